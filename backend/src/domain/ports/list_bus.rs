//! Port abstraction for the per-list pub/sub bus.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

/// Failures raised by bus adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Publishing a payload failed.
    #[error("bus publish failed: {message}")]
    Publish { message: String },

    /// Establishing a subscription failed; the hub retries after a fixed
    /// delay without detaching local clients.
    #[error("bus subscribe failed: {message}")]
    Subscribe { message: String },
}

impl BusError {
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    pub fn subscribe(message: impl Into<String>) -> Self {
        Self::Subscribe {
            message: message.into(),
        }
    }
}

/// Stream of opaque payloads from one list channel. The stream ends when
/// the underlying connection drops; subscribers re-subscribe to resume.
pub type BusStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Channel name for a list.
pub fn list_channel(list_id: i64) -> String {
    format!("list:{list_id}")
}

/// Per-list pub/sub bus bridging realtime hub processes.
///
/// Payloads are opaque binary frames forwarded verbatim. Delivery is
/// best-effort; order is preserved within one channel.
#[async_trait]
pub trait ListBus: Send + Sync {
    /// Publish a payload to the list's channel.
    async fn publish(&self, list_id: i64, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe to the list's channel.
    async fn subscribe(&self, list_id: i64) -> Result<BusStream, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_uses_the_documented_format() {
        assert_eq!(list_channel(5), "list:5");
    }
}

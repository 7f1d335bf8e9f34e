//! Port abstraction for the read-aside view cache.

use std::time::Duration;

use async_trait::async_trait;

/// Failures raised by cache adapters.
///
/// The cached service treats every variant as a miss: an unavailable cache
/// must never fail a read or write path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The cache backend is unreachable.
    #[error("cache unavailable: {message}")]
    Unavailable { message: String },

    /// A reachable backend rejected the operation.
    #[error("cache operation failed: {message}")]
    Operation { message: String },
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }
}

/// Cache key for a list's item collection.
pub fn items_key(list_id: i64) -> String {
    format!("items:{list_id}")
}

/// Cache key for a user's list summaries.
pub fn user_lists_key(user_id: i64) -> String {
    format!("user_lists:{user_id}")
}

/// Read-aside cache over serialized view payloads.
#[async_trait]
pub trait ListViewCache: Send + Sync {
    /// Fetch a cached payload, `None` on miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a payload with a TTL.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Drop the given keys. Missing keys are not an error.
    async fn invalidate(&self, keys: &[String]) -> Result<(), CacheError>;
}

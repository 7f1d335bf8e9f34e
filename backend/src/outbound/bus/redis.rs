//! Redis pub/sub implementation of the [`ListBus`] port.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;

use crate::domain::ports::{list_channel, BusError, BusStream, ListBus};

/// Bus over Redis pub/sub channels, one channel per list.
///
/// Publishing shares one multiplexed connection; each subscription holds a
/// dedicated connection because Redis switches a subscribing connection
/// into pub/sub mode.
#[derive(Clone)]
pub struct RedisListBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisListBus {
    /// Connect to the shared bus.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|err| BusError::subscribe(err.to_string()))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| BusError::publish(err.to_string()))?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl ListBus for RedisListBus {
    async fn publish(&self, list_id: i64, payload: Bytes) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        redis::cmd("PUBLISH")
            .arg(list_channel(list_id))
            .arg(payload.as_ref())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| BusError::publish(err.to_string()))
    }

    async fn subscribe(&self, list_id: i64) -> Result<BusStream, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| BusError::subscribe(err.to_string()))?;
        pubsub
            .subscribe(list_channel(list_id))
            .await
            .map_err(|err| BusError::subscribe(err.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .map(|message| Bytes::from(message.get_payload_bytes().to_vec()));
        Ok(Box::pin(stream))
    }
}

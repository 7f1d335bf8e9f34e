//! Redis-backed implementation of the [`ListViewCache`] port.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::domain::ports::{CacheError, ListViewCache};

/// Read-aside cache over a shared Redis instance.
///
/// The connection manager reconnects in the background; while it is down
/// every operation fails with [`CacheError::Unavailable`] and the cached
/// service falls through to the base store.
#[derive(Clone)]
pub struct RedisListViewCache {
    connection: ConnectionManager,
}

impl RedisListViewCache {
    /// Connect to the cache backend.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::unavailable(err.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::unavailable(err.to_string()))?;
        Ok(Self { connection })
    }
}

fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
        CacheError::unavailable(err.to_string())
    } else {
        CacheError::operation(err.to_string())
    }
}

#[async_trait]
impl ListViewCache for RedisListViewCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(map_redis_error)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(map_redis_error)
    }

    async fn invalidate(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.del(keys).await.map_err(map_redis_error)
    }
}

//! In-process implementation of the [`ListViewCache`] port.
//!
//! Backs single-process deployments and the test suite; entries expire on
//! read once their deadline passes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::ports::{CacheError, ListViewCache};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// TTL-aware in-memory cache.
#[derive(Debug, Default)]
pub struct MemoryListViewCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryListViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of live entries; expired entries may still be counted until
    /// their next read.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl ListViewCache for MemoryListViewCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.lock().insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = MemoryListViewCache::new();
        cache
            .put("items:1", "[]", Duration::from_secs(300))
            .await
            .expect("put succeeds");
        let hit = cache.get("items:1").await.expect("get succeeds");
        assert_eq!(hit.as_deref(), Some("[]"));
    }

    #[rstest]
    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let cache = MemoryListViewCache::new();
        cache
            .put("items:1", "[]", Duration::from_nanos(1))
            .await
            .expect("put succeeds");
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("items:1").await.expect("get succeeds").is_none());
        assert!(cache.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn invalidate_drops_only_named_keys() {
        let cache = MemoryListViewCache::new();
        cache
            .put("items:1", "[]", Duration::from_secs(300))
            .await
            .expect("put succeeds");
        cache
            .put("user_lists:9", "[]", Duration::from_secs(300))
            .await
            .expect("put succeeds");

        cache
            .invalidate(&["items:1".to_owned(), "items:404".to_owned()])
            .await
            .expect("invalidate succeeds");

        assert!(cache.get("items:1").await.expect("get").is_none());
        assert!(cache.get("user_lists:9").await.expect("get").is_some());
    }
}

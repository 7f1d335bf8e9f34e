//! Read-aside cache decorator over [`ListService`].
//!
//! Serialized views live under `items:{list_id}` and
//! `user_lists:{user_id}`; each write path invalidates exactly the keys it
//! could have affected. A failing cache never fails the operation: every
//! path falls through to the base service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::ports::{items_key, user_lists_key, ListViewCache};
use crate::domain::todo_service::{ListService, TodoServiceError};
use crate::domain::{ItemDraft, ItemFilter, ItemSort, ItemUpdate, Role, TodoItem, TodoList};

/// Cache wrapper around a [`ListService`].
pub struct CachedTodoService {
    base: Arc<dyn ListService>,
    cache: Arc<dyn ListViewCache>,
    ttl: Duration,
}

impl CachedTodoService {
    pub fn new(base: Arc<dyn ListService>, cache: Arc<dyn ListViewCache>, ttl: Duration) -> Self {
        Self { base, cache, ttl }
    }

    async fn cached_read<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match self.cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Some(value)
                }
                Err(err) => {
                    // A payload we cannot decode is as good as a miss; the
                    // repopulate below overwrites it.
                    warn!(key, error = %err, "discarding undecodable cache payload");
                    None
                }
            },
            Ok(None) => {
                debug!(key, "cache miss");
                None
            }
            Err(err) => {
                warn!(key, error = %err, "cache read failed; falling through");
                None
            }
        }
    }

    async fn populate<T>(&self, key: &str, value: &T)
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key, error = %err, "view serialization failed; skipping cache");
                return;
            }
        };
        if let Err(err) = self.cache.put(key, &payload, self.ttl).await {
            warn!(key, error = %err, "cache write failed");
        }
    }

    async fn invalidate(&self, keys: &[String]) {
        if let Err(err) = self.cache.invalidate(keys).await {
            warn!(?keys, error = %err, "cache invalidation failed");
        }
    }
}

#[async_trait]
impl ListService for CachedTodoService {
    async fn create_list(&self, user_id: i64, title: &str) -> Result<TodoList, TodoServiceError> {
        let list = self.base.create_list(user_id, title).await?;
        self.invalidate(&[user_lists_key(user_id)]).await;
        Ok(list)
    }

    async fn get_lists(&self, user_id: i64) -> Result<Vec<TodoList>, TodoServiceError> {
        let key = user_lists_key(user_id);
        if let Some(lists) = self.cached_read(&key).await {
            return Ok(lists);
        }

        let lists = self.base.get_lists(user_id).await?;
        self.populate(&key, &lists).await;
        Ok(lists)
    }

    async fn delete_list(&self, user_id: i64, list_id: i64) -> Result<(), TodoServiceError> {
        self.base.delete_list(user_id, list_id).await?;
        self.invalidate(&[items_key(list_id), user_lists_key(user_id)])
            .await;
        Ok(())
    }

    async fn share_list(
        &self,
        owner_id: i64,
        list_id: i64,
        target_email: &str,
        role: Role,
    ) -> Result<(), TodoServiceError> {
        // The sharee's user_lists view cannot be invalidated here: the
        // target is known by email only. The TTL bounds the staleness.
        self.base
            .share_list(owner_id, list_id, target_email, role)
            .await
    }

    async fn add_item(
        &self,
        user_id: i64,
        list_id: i64,
        content: &str,
    ) -> Result<TodoItem, TodoServiceError> {
        let item = self.base.add_item(user_id, list_id, content).await?;
        self.invalidate(&[items_key(list_id)]).await;
        Ok(item)
    }

    async fn create_item(
        &self,
        user_id: i64,
        list_id: i64,
        draft: ItemDraft,
    ) -> Result<TodoItem, TodoServiceError> {
        let item = self.base.create_item(user_id, list_id, draft).await?;
        self.invalidate(&[items_key(list_id)]).await;
        Ok(item)
    }

    async fn get_items(
        &self,
        user_id: i64,
        list_id: i64,
    ) -> Result<Vec<TodoItem>, TodoServiceError> {
        let key = items_key(list_id);
        if let Some(items) = self.cached_read(&key).await {
            return Ok(items);
        }

        let items = self.base.get_items(user_id, list_id).await?;
        self.populate(&key, &items).await;
        Ok(items)
    }

    async fn get_items_filtered(
        &self,
        user_id: i64,
        list_id: i64,
        filter: &ItemFilter,
        sort: ItemSort,
    ) -> Result<Vec<TodoItem>, TodoServiceError> {
        // Filtered views are not cached: the key space over filter/sort
        // combinations would dwarf the hit rate of the full-list view.
        self.base
            .get_items_filtered(user_id, list_id, filter, sort)
            .await
    }

    async fn update_item(
        &self,
        user_id: i64,
        list_id: i64,
        update: ItemUpdate,
    ) -> Result<(), TodoServiceError> {
        self.base.update_item(user_id, list_id, update).await?;
        self.invalidate(&[items_key(list_id)]).await;
        Ok(())
    }

    async fn delete_item(
        &self,
        user_id: i64,
        list_id: i64,
        item_id: i64,
    ) -> Result<(), TodoServiceError> {
        self.base.delete_item(user_id, list_id, item_id).await?;
        self.invalidate(&[items_key(list_id)]).await;
        Ok(())
    }
}

//! Port abstraction for sharded list/item persistence.

use async_trait::async_trait;

use crate::domain::{
    DataError, ItemDraft, ItemFilter, ItemSort, ItemUpdate, Role, TodoItem, TodoList,
};

/// Persistence operations for lists, items, collaborators, and the
/// user-list index.
///
/// Item mutation methods take `list_id` as an explicit routing argument:
/// an item ID alone does not carry shard locality.
#[async_trait]
pub trait TodoStore: Send + Sync {
    /// Mint an ID, commit the list row on its todo cluster, then write the
    /// owner's `(user_id, list_id, OWNER)` index row on the user cluster.
    /// An index failure is queued for retry and the call still succeeds:
    /// the primary row is durable, the index eventually consistent.
    async fn create_list(&self, owner_id: i64, title: &str) -> Result<TodoList, DataError>;

    /// Enumerate lists visible to a user via the user-list index, fetching
    /// each list row from its own shard. Each result carries the role from
    /// the index row.
    async fn lists_for_user(&self, user_id: i64) -> Result<Vec<TodoList>, DataError>;

    /// Single-hop read of a list row.
    async fn find_list(&self, list_id: i64) -> Result<Option<TodoList>, DataError>;

    /// Delete the list row. Collaborators' index rows are not fanned out;
    /// the cleanup path lives outside this store.
    async fn delete_list(&self, list_id: i64) -> Result<(), DataError>;

    /// Insert the collaborator row (unique on `(list_id, user_id)`), then
    /// the user-list index row. Index failure handling matches
    /// [`TodoStore::create_list`].
    async fn add_collaborator(
        &self,
        list_id: i64,
        user_id: i64,
        role: Role,
    ) -> Result<(), DataError>;

    /// Mint an ID and persist an item with legacy-field defaults applied.
    async fn create_item(&self, list_id: i64, draft: ItemDraft) -> Result<TodoItem, DataError>;

    /// All items of a list, newest first.
    async fn items_for_list(&self, list_id: i64) -> Result<Vec<TodoItem>, DataError>;

    /// Items of a list matching `filter`, ordered by `sort`.
    async fn items_for_list_filtered(
        &self,
        list_id: i64,
        filter: &ItemFilter,
        sort: ItemSort,
    ) -> Result<Vec<TodoItem>, DataError>;

    /// Update an item on the shard owned by `list_id`.
    async fn update_item(&self, list_id: i64, update: ItemUpdate) -> Result<(), DataError>;

    /// Delete an item on the shard owned by `list_id`.
    async fn delete_item(&self, list_id: i64, item_id: i64) -> Result<(), DataError>;
}

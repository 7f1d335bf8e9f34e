//! Sharded list/item repository: routed CRUD, the cross-shard index write
//! pipeline, and the durable retry enqueue.
//!
//! Primary writes commit first on the entity's own cluster. The user-list
//! index row lives on the owner's user cluster; when that write fails the
//! row is appended to `user_list_index_retry` on the *target* cluster and
//! the operation still succeeds; the retry worker owns convergence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text, Timestamptz};
use diesel::{OptionalExtension, QueryableByName};
use diesel_async::RunQueryDsl;
use tracing::{error, warn};

use crate::domain::ports::TodoStore;
use crate::domain::{
    DataError, IdGenerator, IdGeneratorError, ItemDraft, ItemFilter, ItemSort, ItemUpdate, Role,
    TodoItem, TodoList,
};

use super::bootstrap::ensure_retry_table;
use super::diesel_helpers::{
    clamp_error_message, map_diesel_error, map_pool_error, trace_statement,
};
use super::item_query::{filtered_items, ITEM_COLUMNS};
use super::router::{Route, ShardRouter};

/// Worker/datacenter identity of the todo store's ID generator.
const TODO_ID_WORKER: i64 = 2;
const TODO_ID_DATACENTER: i64 = 1;

#[derive(QueryableByName)]
struct ListRow {
    #[diesel(sql_type = BigInt)]
    list_id: i64,
    #[diesel(sql_type = BigInt)]
    owner_id: i64,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = Integer)]
    version: i32,
    #[diesel(sql_type = Bool)]
    is_deleted: bool,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

impl From<ListRow> for TodoList {
    fn from(row: ListRow) -> Self {
        Self {
            id: row.list_id,
            owner_id: row.owner_id,
            title: row.title,
            version: row.version,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            role: None,
        }
    }
}

#[derive(QueryableByName)]
struct ItemRow {
    #[diesel(sql_type = BigInt)]
    item_id: i64,
    #[diesel(sql_type = BigInt)]
    list_id: i64,
    #[diesel(sql_type = Text)]
    content: String,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    description: String,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Text)]
    priority: String,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    due_date: Option<DateTime<Utc>>,
    #[diesel(sql_type = Text)]
    tags: String,
    #[diesel(sql_type = Bool)]
    is_done: bool,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for TodoItem {
    type Error = DataError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.item_id,
            list_id: row.list_id,
            content: row.content,
            name: row.name,
            description: row.description,
            status: crate::domain::ItemStatus::parse(&row.status)?,
            priority: crate::domain::Priority::parse(&row.priority)?,
            due_date: row.due_date,
            tags: row.tags,
            is_done: row.is_done,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(QueryableByName)]
struct IndexRefRow {
    #[diesel(sql_type = BigInt)]
    list_id: i64,
    #[diesel(sql_type = Text)]
    role: String,
}

#[derive(QueryableByName)]
struct RowTimestamps {
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

/// Router-backed implementation of the [`TodoStore`] port.
pub struct ShardedTodoStore {
    router: Arc<ShardRouter>,
    ids: IdGenerator,
}

impl ShardedTodoStore {
    /// Build the store with its own ID generator instance.
    pub fn new(router: Arc<ShardRouter>) -> Result<Self, IdGeneratorError> {
        Ok(Self {
            router,
            ids: IdGenerator::new(TODO_ID_WORKER, TODO_ID_DATACENTER)?,
        })
    }

    /// Write the user-list index row for `(user_id, list_id, role)`. On
    /// failure, append the write to the retry queue on the index cluster;
    /// convergence then belongs to the retry worker, so the caller's
    /// operation still succeeds.
    async fn write_index_or_enqueue(
        &self,
        user_id: i64,
        list_id: i64,
        role: Role,
    ) -> Result<(), DataError> {
        let idx_route = self.router.route_user_list_index(user_id)?;
        trace_statement("user_list_index_insert", &idx_route);

        let result = async {
            let mut conn = idx_route.pool.get().await.map_err(map_pool_error)?;
            diesel::sql_query(format!(
                "INSERT INTO {} (user_id, list_id, role) VALUES ($1, $2, $3)",
                idx_route.table
            ))
            .bind::<BigInt, _>(user_id)
            .bind::<BigInt, _>(list_id)
            .bind::<Text, _>(role.as_str())
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "user list index insert"))?;
            Ok::<(), DataError>(())
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            // An existing row means an earlier attempt already converged.
            Err(err) if err.is_conflict() => Ok(()),
            Err(err) => {
                warn!(
                    user_id,
                    list_id,
                    error = %err,
                    table = %idx_route.table,
                    "index insert failed; queueing for retry"
                );
                if let Err(enqueue_err) = self
                    .enqueue_index_retry(&idx_route, user_id, list_id, role, &err)
                    .await
                {
                    error!(
                        user_id,
                        list_id,
                        error = %enqueue_err,
                        "failed to record index retry; index row is lost until repair"
                    );
                }
                Ok(())
            }
        }
    }

    async fn enqueue_index_retry(
        &self,
        idx_route: &Route,
        user_id: i64,
        list_id: i64,
        role: Role,
        cause: &DataError,
    ) -> Result<(), DataError> {
        let mut conn = idx_route.pool.get().await.map_err(map_pool_error)?;
        // The retry table is per-cluster local; creating it lazily is the
        // single DDL exception allowed at request time.
        ensure_retry_table(&mut conn).await?;

        let message = cause.to_string();
        diesel::sql_query(
            "INSERT INTO user_list_index_retry \
             (user_id, list_id, role, target_table, err_msg, retries) \
             VALUES ($1, $2, $3, $4, $5, 0)",
        )
        .bind::<BigInt, _>(user_id)
        .bind::<BigInt, _>(list_id)
        .bind::<Text, _>(role.as_str())
        .bind::<Text, _>(&idx_route.table)
        .bind::<Text, _>(clamp_error_message(&message))
        .execute(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "index retry enqueue"))?;
        Ok(())
    }
}

#[async_trait]
impl TodoStore for ShardedTodoStore {
    async fn create_list(&self, owner_id: i64, title: &str) -> Result<TodoList, DataError> {
        let list_id = self.ids.next_id()?;

        let route = self.router.route_list(list_id)?;
        trace_statement("create_list", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let stamps: RowTimestamps = diesel::sql_query(format!(
            "INSERT INTO {} (list_id, owner_id, title) VALUES ($1, $2, $3) \
             RETURNING created_at, updated_at",
            route.table
        ))
        .bind::<BigInt, _>(list_id)
        .bind::<BigInt, _>(owner_id)
        .bind::<Text, _>(title)
        .get_result(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "list insert"))?;
        drop(conn);

        // The primary row is durable from here on; the owner's index entry
        // follows, eventually consistent under partial failure.
        self.write_index_or_enqueue(owner_id, list_id, Role::Owner)
            .await?;

        Ok(TodoList {
            id: list_id,
            owner_id,
            title: title.to_owned(),
            version: 1,
            is_deleted: false,
            created_at: stamps.created_at,
            updated_at: stamps.updated_at,
            role: Some(Role::Owner),
        })
    }

    async fn lists_for_user(&self, user_id: i64) -> Result<Vec<TodoList>, DataError> {
        let idx_route = self.router.route_user_list_index(user_id)?;
        trace_statement("user_list_index_scan", &idx_route);
        let mut conn = idx_route.pool.get().await.map_err(map_pool_error)?;
        let refs: Vec<IndexRefRow> = diesel::sql_query(format!(
            "SELECT list_id, role FROM {} WHERE user_id = $1 ORDER BY created_at",
            idx_route.table
        ))
        .bind::<BigInt, _>(user_id)
        .load(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "user list index scan"))?;
        drop(conn);

        let mut lists = Vec::with_capacity(refs.len());
        for index_ref in refs {
            let role = Role::parse(&index_ref.role)?;
            match self.find_list(index_ref.list_id).await {
                Ok(Some(mut list)) => {
                    list.role = Some(role);
                    lists.push(list);
                }
                // A stale index row (list deleted without fan-out) is
                // expected; skip it.
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        user_id,
                        list_id = index_ref.list_id,
                        error = %err,
                        "skipping unreachable list during enumeration"
                    );
                }
            }
        }
        Ok(lists)
    }

    async fn find_list(&self, list_id: i64) -> Result<Option<TodoList>, DataError> {
        let route = self.router.route_list(list_id)?;
        trace_statement("find_list", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let row: Option<ListRow> = diesel::sql_query(format!(
            "SELECT list_id, owner_id, title, version, is_deleted, created_at, updated_at \
             FROM {} WHERE list_id = $1",
            route.table
        ))
        .bind::<BigInt, _>(list_id)
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, "list fetch"))?;

        Ok(row.map(TodoList::from))
    }

    async fn delete_list(&self, list_id: i64) -> Result<(), DataError> {
        let route = self.router.route_list(list_id)?;
        trace_statement("delete_list", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        diesel::sql_query(format!("DELETE FROM {} WHERE list_id = $1", route.table))
            .bind::<BigInt, _>(list_id)
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "list delete"))?;
        // Collaborators' user-list index rows are not fanned out here; the
        // cleanup path lives outside this store.
        Ok(())
    }

    async fn add_collaborator(
        &self,
        list_id: i64,
        user_id: i64,
        role: Role,
    ) -> Result<(), DataError> {
        let route = self.router.route_collaborator(list_id)?;
        trace_statement("add_collaborator", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        diesel::sql_query(format!(
            "INSERT INTO {} (list_id, user_id, role) VALUES ($1, $2, $3)",
            route.table
        ))
        .bind::<BigInt, _>(list_id)
        .bind::<BigInt, _>(user_id)
        .bind::<Text, _>(role.as_str())
        .execute(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "collaborator insert"))?;
        drop(conn);

        self.write_index_or_enqueue(user_id, list_id, role).await?;
        Ok(())
    }

    async fn create_item(&self, list_id: i64, draft: ItemDraft) -> Result<TodoItem, DataError> {
        let draft = draft.with_defaults();
        let item_id = self.ids.next_id()?;

        let route = self.router.route_item(list_id)?;
        trace_statement("create_item", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let stamps: RowTimestamps = diesel::sql_query(format!(
            "INSERT INTO {} (item_id, list_id, content, name, description, status, priority, \
             due_date, tags, is_done) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING created_at, updated_at",
            route.table
        ))
        .bind::<BigInt, _>(item_id)
        .bind::<BigInt, _>(list_id)
        .bind::<Text, _>(&draft.content)
        .bind::<Text, _>(&draft.name)
        .bind::<Text, _>(&draft.description)
        .bind::<Text, _>(draft.status().as_str())
        .bind::<Text, _>(draft.priority().as_str())
        .bind::<Nullable<Timestamptz>, _>(draft.due_date)
        .bind::<Text, _>(&draft.tags)
        .bind::<Bool, _>(draft.is_done)
        .get_result(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "item insert"))?;

        let status = draft.status();
        let priority = draft.priority();
        Ok(TodoItem {
            id: item_id,
            list_id,
            content: draft.content,
            name: draft.name,
            description: draft.description,
            status,
            priority,
            due_date: draft.due_date,
            tags: draft.tags,
            is_done: draft.is_done,
            created_at: stamps.created_at,
            updated_at: stamps.updated_at,
        })
    }

    async fn items_for_list(&self, list_id: i64) -> Result<Vec<TodoItem>, DataError> {
        let route = self.router.route_item(list_id)?;
        trace_statement("items_for_list", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ItemRow> = diesel::sql_query(format!(
            "SELECT {ITEM_COLUMNS} FROM {} WHERE list_id = $1 ORDER BY created_at DESC",
            route.table
        ))
        .bind::<BigInt, _>(list_id)
        .load(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "item scan"))?;

        rows.into_iter().map(TodoItem::try_from).collect()
    }

    async fn items_for_list_filtered(
        &self,
        list_id: i64,
        filter: &ItemFilter,
        sort: ItemSort,
    ) -> Result<Vec<TodoItem>, DataError> {
        let route = self.router.route_item(list_id)?;
        trace_statement("items_for_list_filtered", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ItemRow> = filtered_items(&route.table, list_id, filter, sort)
            .into_boxed()
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "filtered item scan"))?;

        rows.into_iter().map(TodoItem::try_from).collect()
    }

    async fn update_item(&self, list_id: i64, update: ItemUpdate) -> Result<(), DataError> {
        let route = self.router.route_item(list_id)?;
        trace_statement("update_item", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::sql_query(format!(
            "UPDATE {} SET name = $1, description = $2, status = $3, priority = $4, \
             due_date = $5, tags = $6, is_done = $7, updated_at = now() WHERE item_id = $8",
            route.table
        ))
        .bind::<Text, _>(&update.name)
        .bind::<Text, _>(&update.description)
        .bind::<Text, _>(update.status.as_str())
        .bind::<Text, _>(update.priority.as_str())
        .bind::<Nullable<Timestamptz>, _>(update.due_date)
        .bind::<Text, _>(&update.tags)
        .bind::<Bool, _>(update.is_done)
        .bind::<BigInt, _>(update.item_id)
        .execute(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "item update"))?;

        if updated == 0 {
            return Err(DataError::not_found(format!(
                "no item {} in list {list_id}",
                update.item_id
            )));
        }
        Ok(())
    }

    async fn delete_item(&self, list_id: i64, item_id: i64) -> Result<(), DataError> {
        let route = self.router.route_item(list_id)?;
        trace_statement("delete_item", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::sql_query(format!("DELETE FROM {} WHERE item_id = $1", route.table))
            .bind::<BigInt, _>(item_id)
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "item delete"))?;

        if deleted == 0 {
            return Err(DataError::not_found(format!(
                "no item {item_id} in list {list_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::persistence::pool::{DbPool, PoolConfig};
    use crate::outbound::persistence::router::DbCluster;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn store_builds_with_a_bounded_generator() {
        let router = Arc::new(ShardRouter::new(1024, 4096, 64));
        router.register_todo_cluster(
            0,
            DbCluster::new(
                "todo_data_db_0",
                DbPool::connect_lazy(PoolConfig::new("postgres://localhost:1/unused")),
            ),
        );
        let store = ShardedTodoStore::new(router).expect("generator ids in range");
        let id = store.ids.next_id().expect("mint succeeds");
        assert!(id > 0);
    }
}

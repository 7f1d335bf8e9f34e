//! Shard router: deterministic placement of logical records across the
//! physical fleet.
//!
//! The router is configured once at boot with the physical clusters of the
//! two entity families and answers routing decisions, not raw handles.
//! Placement hashes the key with CRC32 (big-endian bytes for integer keys,
//! UTF-8 bytes for emails), picks the cluster by `hash % clusters`, and the
//! logical table by `(hash / clusters) % tables_per_db`. Any change to the
//! cluster count or logical-shard count invalidates placement and requires
//! a data migration.

use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::RoutingError;

use super::pool::DbPool;

/// Logical-table families on the user clusters.
const USER_TABLE: &str = "users";
const USER_LIST_INDEX_TABLE: &str = "user_list_index";
const USER_EMAIL_INDEX_TABLE: &str = "user_email_index";

/// Logical-table families on the todo clusters.
const LIST_TABLE: &str = "todo_lists_tab";
const ITEM_TABLE: &str = "todo_items_tab";
const COLLABORATOR_TABLE: &str = "list_collaborators_tab";
const TODO_SHARD: &str = "todo_shard";

/// One physical database instance and its pool.
#[derive(Debug, Clone)]
pub struct DbCluster {
    id: String,
    pool: DbPool,
}

impl DbCluster {
    pub fn new(id: impl Into<String>, pool: DbPool) -> Self {
        Self {
            id: id.into(),
            pool,
        }
    }

    /// Stable cluster identifier (e.g. `todo_user_db_7`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The cluster's connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// A resolved routing decision.
///
/// Carries the cluster handle plus the placement metadata repositories log
/// with every statement.
#[derive(Debug, Clone)]
pub struct Route {
    pub pool: DbPool,
    pub cluster_id: String,
    pub db_index: usize,
    pub table_index: u32,
    pub logical_shard: i64,
    pub table: String,
}

/// Shard topology for one entity family.
#[derive(Debug, Default)]
struct Family {
    clusters: Vec<Option<Arc<DbCluster>>>,
}

impl Family {
    fn register(&mut self, index: usize, cluster: Arc<DbCluster>) {
        if index >= self.clusters.len() {
            self.clusters.resize(index + 1, None);
        }
        self.clusters[index] = Some(cluster);
    }

    fn registered(&self) -> Vec<Arc<DbCluster>> {
        self.clusters.iter().flatten().cloned().collect()
    }
}

/// Router over the user and todo cluster fleets.
///
/// Registrations happen only at boot; the hot path takes the reader lock.
#[derive(Debug)]
pub struct ShardRouter {
    user_logical_shards: u32,
    todo_logical_shards: u32,
    tables_per_db: u32,
    users: RwLock<Family>,
    todos: RwLock<Family>,
}

impl ShardRouter {
    /// Build an empty router for the given logical-shard counts.
    ///
    /// `tables_per_db` is a property of the entity family, not derived from
    /// the logical-shard count; unaligned values are legal but produce
    /// uneven load.
    pub fn new(user_logical_shards: u32, todo_logical_shards: u32, tables_per_db: u32) -> Self {
        Self {
            user_logical_shards,
            todo_logical_shards,
            tables_per_db,
            users: RwLock::new(Family::default()),
            todos: RwLock::new(Family::default()),
        }
    }

    /// Entity families whose configured logical-shard count is not
    /// exactly `clusters * tables_per_db` for the registered fleet. Such
    /// topologies still place every key, but load spreads unevenly across
    /// the logical tables; binaries log the result after registration.
    pub fn misaligned_families(&self) -> Vec<&'static str> {
        let user_fleet = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clusters
            .len() as u32
            * self.tables_per_db;
        let todo_fleet = self
            .todos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clusters
            .len() as u32
            * self.tables_per_db;

        let mut misaligned = Vec::new();
        if self.user_logical_shards != user_fleet {
            misaligned.push("user");
        }
        if self.todo_logical_shards != todo_fleet {
            misaligned.push("todo");
        }
        misaligned
    }

    /// Register a physical user cluster at a fixed slot. Boot-time only.
    pub fn register_user_cluster(&self, index: usize, cluster: DbCluster) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(index, Arc::new(cluster));
    }

    /// Register a physical todo cluster at a fixed slot. Boot-time only.
    pub fn register_todo_cluster(&self, index: usize, cluster: DbCluster) {
        self.todos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(index, Arc::new(cluster));
    }

    /// All registered user clusters, in slot order. Used by the retry
    /// worker and the bootstrap pass.
    pub fn user_clusters(&self) -> Vec<Arc<DbCluster>> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registered()
    }

    /// All registered todo clusters, in slot order.
    pub fn todo_clusters(&self) -> Vec<Arc<DbCluster>> {
        self.todos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registered()
    }

    /// Route to a user row: `users_NNNN` on the owning user cluster.
    pub fn route_user(&self, user_id: i64) -> Result<Route, RoutingError> {
        self.route_user_family(key_hash(user_id), USER_TABLE)
    }

    /// Route to a user-list index row. Keyed by `user_id`, deliberately
    /// independent from the list's own shard.
    pub fn route_user_list_index(&self, user_id: i64) -> Result<Route, RoutingError> {
        self.route_user_family(key_hash(user_id), USER_LIST_INDEX_TABLE)
    }

    /// Route to an email index row. Keyed by the email's UTF-8 bytes.
    pub fn route_email_index(&self, email: &str) -> Result<Route, RoutingError> {
        self.route_user_family(crc32fast::hash(email.as_bytes()), USER_EMAIL_INDEX_TABLE)
    }

    /// Route to a list row: `todo_lists_tab_NNNN` on the list's cluster.
    pub fn route_list(&self, list_id: i64) -> Result<Route, RoutingError> {
        self.route_todo_family(key_hash(list_id), LIST_TABLE)
    }

    /// Route to the items of a list; colocated with the list row.
    pub fn route_item(&self, list_id: i64) -> Result<Route, RoutingError> {
        self.route_todo_family(key_hash(list_id), ITEM_TABLE)
    }

    /// Route to the collaborator rows of a list; colocated with the list
    /// row.
    pub fn route_collaborator(&self, list_id: i64) -> Result<Route, RoutingError> {
        self.route_todo_family(key_hash(list_id), COLLABORATOR_TABLE)
    }

    /// Route to the generic todo shard suffix for a list key. Provisioning
    /// and diagnostics use this when no single table family applies.
    pub fn route_todo_shard(&self, list_id: i64) -> Result<Route, RoutingError> {
        self.route_todo_family(key_hash(list_id), TODO_SHARD)
    }

    fn route_user_family(&self, hash: u32, table_family: &str) -> Result<Route, RoutingError> {
        let family = self.users.read().unwrap_or_else(PoisonError::into_inner);
        route_for_hash(&family, hash, self.tables_per_db, "user", table_family)
    }

    fn route_todo_family(&self, hash: u32, table_family: &str) -> Result<Route, RoutingError> {
        let family = self.todos.read().unwrap_or_else(PoisonError::into_inner);
        route_for_hash(&family, hash, self.tables_per_db, "todo", table_family)
    }
}

/// CRC32 over the big-endian bytes of the key.
fn key_hash(key: i64) -> u32 {
    crc32fast::hash(&(key as u64).to_be_bytes())
}

fn route_for_hash(
    family: &Family,
    hash: u32,
    tables_per_db: u32,
    family_name: &'static str,
    table_family: &str,
) -> Result<Route, RoutingError> {
    let cluster_count = family.clusters.len();
    if cluster_count == 0 {
        return Err(RoutingError::NoClusters {
            family: family_name,
        });
    }

    let db_index = (hash % cluster_count as u32) as usize;
    let cluster = family.clusters[db_index]
        .as_ref()
        .ok_or(RoutingError::UnregisteredCluster {
            family: family_name,
            index: db_index,
        })?;

    let table_index = (hash / cluster_count as u32) % tables_per_db;

    Ok(Route {
        pool: cluster.pool.clone(),
        cluster_id: cluster.id.clone(),
        db_index,
        table_index,
        logical_shard: i64::from(table_index),
        table: format!("{table_family}_{table_index:04}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::persistence::pool::PoolConfig;
    use rstest::{fixture, rstest};

    fn lazy_pool() -> DbPool {
        DbPool::connect_lazy(PoolConfig::new("postgres://localhost:1/unused"))
    }

    #[fixture]
    fn router() -> ShardRouter {
        let router = ShardRouter::new(1024, 4096, 64);
        for i in 0..16 {
            router.register_user_cluster(
                i,
                DbCluster::new(format!("todo_user_db_{i}"), lazy_pool()),
            );
        }
        for i in 0..64 {
            router.register_todo_cluster(
                i,
                DbCluster::new(format!("todo_data_db_{i}"), lazy_pool()),
            );
        }
        router
    }

    #[rstest]
    #[tokio::test]
    async fn placement_matches_the_reference_formula(router: ShardRouter) {
        let user_id = 1_234_567_890_i64;
        let hash = crc32fast::hash(&(user_id as u64).to_be_bytes());
        let route = router.route_user(user_id).expect("routable key");

        assert_eq!(route.db_index, (hash % 16) as usize);
        assert_eq!(route.table_index, (hash / 16) % 64);
        assert_eq!(route.table, format!("users_{:04}", (hash / 16) % 64));
        assert_eq!(route.cluster_id, format!("todo_user_db_{}", hash % 16));
    }

    #[rstest]
    #[tokio::test]
    async fn routing_is_deterministic(router: ShardRouter) {
        for key in [0_i64, 1, 42, i64::MAX, -1] {
            let first = router.route_list(key).expect("routable key");
            let second = router.route_list(key).expect("routable key");
            assert_eq!(first.db_index, second.db_index);
            assert_eq!(first.table, second.table);
            assert_eq!(first.cluster_id, second.cluster_id);
        }
    }

    #[rstest]
    #[tokio::test]
    async fn every_key_maps_to_a_registered_cluster(router: ShardRouter) {
        for key in (0..10_000_i64).map(|k| k.wrapping_mul(2_654_435_761)) {
            let route = router.route_user(key).expect("covered placement");
            assert!(route.db_index < 16);
            assert!(route.table_index < 64);

            let route = router.route_list(key).expect("covered placement");
            assert!(route.db_index < 64);
            assert!(route.table_index < 64);
        }
    }

    #[rstest]
    #[tokio::test]
    async fn email_routes_cover_the_fleet(router: ShardRouter) {
        for n in 0..1_000 {
            let email = format!("user{n}@example.com");
            let route = router.route_email_index(&email).expect("covered placement");
            assert!(route.db_index < 16);
            assert!(route.table.starts_with("user_email_index_"));
        }
    }

    #[rstest]
    #[tokio::test]
    async fn list_keyed_families_are_colocated(router: ShardRouter) {
        for list_id in [1_i64, 99, 123_456_789] {
            let list = router.route_list(list_id).expect("routable key");
            let item = router.route_item(list_id).expect("routable key");
            let collab = router.route_collaborator(list_id).expect("routable key");

            assert_eq!(list.db_index, item.db_index);
            assert_eq!(list.db_index, collab.db_index);
            assert_eq!(list.table_index, item.table_index);
            assert_eq!(list.table_index, collab.table_index);
            assert!(list.table.starts_with("todo_lists_tab_"));
            assert!(item.table.starts_with("todo_items_tab_"));
            assert!(collab.table.starts_with("list_collaborators_tab_"));

            let shard = router.route_todo_shard(list_id).expect("routable key");
            assert_eq!(shard.db_index, list.db_index);
            assert_eq!(shard.table, format!("todo_shard_{:04}", list.table_index));
        }
    }

    #[rstest]
    #[tokio::test]
    async fn user_and_index_routes_share_the_cluster(router: ShardRouter) {
        let user_id = 7_i64;
        let user = router.route_user(user_id).expect("routable key");
        let index = router.route_user_list_index(user_id).expect("routable key");
        assert_eq!(user.db_index, index.db_index);
        assert_eq!(user.table_index, index.table_index);
        assert!(index.table.starts_with("user_list_index_"));
    }

    #[rstest]
    #[tokio::test]
    async fn table_suffixes_are_zero_padded() {
        let router = ShardRouter::new(1024, 4096, 64);
        router.register_user_cluster(0, DbCluster::new("todo_user_db_0", lazy_pool()));
        let route = router.route_user(0).expect("routable key");
        assert_eq!(route.table.len(), "users_".len() + 4);
    }

    #[rstest]
    #[tokio::test]
    async fn canonical_topology_is_aligned(router: ShardRouter) {
        assert!(router.misaligned_families().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn unaligned_shard_counts_are_reported_per_family() {
        // 1000 user shards over 16x64 tables and 4096 todo shards over an
        // 8-cluster fleet: both families place correctly, neither exactly.
        let router = ShardRouter::new(1000, 4096, 64);
        for i in 0..16 {
            router.register_user_cluster(
                i,
                DbCluster::new(format!("todo_user_db_{i}"), lazy_pool()),
            );
        }
        for i in 0..8 {
            router.register_todo_cluster(
                i,
                DbCluster::new(format!("todo_data_db_{i}"), lazy_pool()),
            );
        }

        assert_eq!(router.misaligned_families(), vec!["user", "todo"]);
        router.route_user(42).expect("placement still total");
        router.route_list(42).expect("placement still total");
    }

    #[rstest]
    fn empty_family_is_a_typed_error() {
        let router = ShardRouter::new(1024, 4096, 64);
        assert_eq!(
            router.route_user(1).expect_err("no clusters"),
            crate::domain::RoutingError::NoClusters { family: "user" }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unregistered_slot_is_a_typed_error() {
        let router = ShardRouter::new(1024, 4096, 64);
        // Slot 1 exists because slot 3 was registered, but it holds no
        // cluster; keys hashing onto it must fail loudly.
        router.register_todo_cluster(3, DbCluster::new("todo_data_db_3", lazy_pool()));
        let mut saw_unregistered = false;
        for key in 0..64_i64 {
            match router.route_list(key) {
                Err(crate::domain::RoutingError::UnregisteredCluster { family, .. }) => {
                    assert_eq!(family, "todo");
                    saw_unregistered = true;
                }
                Ok(route) => assert_eq!(route.db_index, 3),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_unregistered);
    }
}

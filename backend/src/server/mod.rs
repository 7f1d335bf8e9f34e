//! Boot-time wiring: configuration, cluster registration, and service
//! construction shared by the binaries.

pub mod config;
pub mod health;

use std::sync::Arc;

use tracing::warn;

use crate::domain::ports::ListViewCache;
use crate::domain::{
    AuthService, CachedTodoService, IdGeneratorError, ListService, TodoService,
};
use crate::outbound::cache::{MemoryListViewCache, RedisListViewCache};
use crate::outbound::persistence::{
    DbCluster, DbPool, PoolConfig, ShardRouter, ShardedTodoStore, ShardedUserStore,
};

use config::AppConfig;

/// Build the shard router and register the whole fleet with lazy pools.
/// Connections open on first use, so boot does not serially dial every
/// cluster.
pub fn build_router(config: &AppConfig) -> Arc<ShardRouter> {
    let router = Arc::new(ShardRouter::new(
        config.topology.user_logical_shards,
        config.topology.todo_logical_shards,
        config.topology.tables_per_db,
    ));

    for index in 0..config.topology.user_clusters {
        let pool = DbPool::connect_lazy(PoolConfig::new(config.user_cluster_url(index)));
        router.register_user_cluster(index, DbCluster::new(config.user_cluster_name(index), pool));
    }
    for index in 0..config.topology.todo_clusters {
        let pool = DbPool::connect_lazy(PoolConfig::new(config.todo_cluster_url(index)));
        router.register_todo_cluster(index, DbCluster::new(config.todo_cluster_name(index), pool));
    }

    for family in router.misaligned_families() {
        warn!(
            family,
            tables_per_db = config.topology.tables_per_db,
            "logical shard count is not clusters * tables_per_db; placement holds but load will be uneven"
        );
    }

    router
}

/// Service bundle exposed to the transport layer.
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub lists: Arc<dyn ListService>,
}

/// Construct repositories and services over a wired router.
///
/// The cache prefers Redis; when the backend is unreachable at boot the
/// state falls back to the in-process cache so reads keep working.
pub async fn build_state(
    router: Arc<ShardRouter>,
    config: &AppConfig,
) -> Result<AppState, IdGeneratorError> {
    let users = Arc::new(ShardedUserStore::new(Arc::clone(&router))?);
    let todos = Arc::new(ShardedTodoStore::new(router)?);

    let base: Arc<dyn ListService> = Arc::new(TodoService::new(todos, users.clone()));
    let cache: Arc<dyn ListViewCache> = match RedisListViewCache::connect(&config.redis_url).await
    {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            warn!(error = %err, "cache backend unreachable; using in-process cache");
            Arc::new(MemoryListViewCache::new())
        }
    };
    let lists: Arc<dyn ListService> =
        Arc::new(CachedTodoService::new(base, cache, config.cache_ttl));

    Ok(AppState {
        auth: Arc::new(AuthService::new(users)),
        lists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn router_registers_the_whole_fleet() {
        let config = AppConfig::from_env().expect("defaults parse");
        let router = build_router(&config);
        assert_eq!(router.user_clusters().len(), config.topology.user_clusters);
        assert_eq!(router.todo_clusters().len(), config.topology.todo_clusters);
        assert!(router.misaligned_families().is_empty());

        // Every sampled key lands on a registered cluster.
        for key in 0..1_000_i64 {
            router.route_user(key).expect("registered fleet");
            router.route_list(key).expect("registered fleet");
        }
    }
}

//! Sharded persistence adapters: cluster pools, the shard router, routed
//! repositories, the retry worker, and the provisioning contract.

pub mod bootstrap;
mod diesel_helpers;
mod item_query;
mod pool;
mod retry_worker;
mod router;
mod sharded_todo_store;
mod sharded_user_store;

pub use pool::{DbPool, PoolConfig, PoolError};
pub use retry_worker::{IndexRetryWorker, RetryPassStats};
pub use router::{DbCluster, Route, ShardRouter};
pub use sharded_todo_store::ShardedTodoStore;
pub use sharded_user_store::ShardedUserStore;

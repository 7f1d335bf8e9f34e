//! Cache adapters for the [`crate::domain::ports::ListViewCache`] port.

mod memory;
mod redis;

pub use self::memory::MemoryListViewCache;
pub use self::redis::RedisListViewCache;

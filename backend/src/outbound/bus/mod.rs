//! Bus adapters for the [`crate::domain::ports::ListBus`] port.

mod memory;
mod redis;

pub use self::memory::MemoryListBus;
pub use self::redis::RedisListBus;

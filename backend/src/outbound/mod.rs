//! Outbound adapters: persistence, cache, and pub/sub bus.

pub mod bus;
pub mod cache;
pub mod persistence;

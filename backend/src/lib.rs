//! Horizontally sharded data service for the list/item application.
//!
//! The interesting machinery is the sharding substrate: deterministic
//! placement over a fleet of physical clusters and logical tables, a
//! two-shard write pipeline with a durable retry queue, secondary-key
//! lookups through a global email index, a read-aside cache, and a
//! per-list realtime fanout hub bridged by pub/sub channels.

pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod server;

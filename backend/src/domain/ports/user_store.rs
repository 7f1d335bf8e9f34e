//! Port abstraction for sharded user persistence.

use async_trait::async_trait;

use crate::domain::{DataError, NewUser, User};

/// Persistence operations for users and their email index.
///
/// Implementations route every call through the shard topology; callers
/// never see table or cluster names.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Mint an ID and insert the user row, then the email-index row. A
    /// duplicate email surfaces as [`DataError::Conflict`]; the primary row
    /// is not rolled back because the two writes target different clusters.
    async fn create(&self, new_user: NewUser) -> Result<User, DataError>;

    /// Two-hop lookup: email index to `user_id`, then the user shard. A
    /// missing index row means `None`; no scatter across user shards.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DataError>;

    /// Single-hop read on the user shard.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, DataError>;

    /// Flip the verification flag for the user owning `email`.
    /// [`DataError::NotFound`] when either lookup hop returns no row.
    async fn set_verified(&self, email: &str, verified: bool) -> Result<(), DataError>;
}

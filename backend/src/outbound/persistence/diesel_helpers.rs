//! Shared helpers for the sharded Diesel repositories.
//!
//! Maps driver failures onto the domain error taxonomy and centralizes the
//! per-statement routing log line.

use tracing::debug;

use crate::domain::DataError;

use super::pool::PoolError;
use super::router::Route;

/// Longest error message persisted into the retry queue.
pub const MAX_STORED_ERROR_LEN: usize = 500;

/// Map a pool checkout failure. Pool problems are connectivity problems.
pub fn map_pool_error(error: PoolError) -> DataError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            DataError::transient(message)
        }
    }
}

/// Map a Diesel error onto the taxonomy: unique-key violations become
/// `Conflict`, everything else is `Transient` (driver or network).
pub fn map_diesel_error(error: diesel::result::Error, operation: &str) -> DataError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), operation, "statement failed");
        }
        other => debug!(error = %other, operation, "statement failed"),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            DataError::conflict(info.message().to_owned())
        }
        DieselError::NotFound => DataError::not_found(operation.to_owned()),
        other => DataError::transient(other.to_string()),
    }
}

/// Emit the routing context for one sharded statement.
pub fn trace_statement(action: &str, route: &Route) {
    debug!(
        action,
        cluster = %route.cluster_id,
        shard = route.logical_shard,
        table = %route.table,
        "sharded statement"
    );
}

/// Clamp an error message to the retry queue's column width.
pub fn clamp_error_message(message: &str) -> &str {
    match message.char_indices().nth(MAX_STORED_ERROR_LEN) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_errors_map_to_transient() {
        let err = map_pool_error(PoolError::checkout("timed out"));
        assert!(matches!(err, DataError::Transient { .. }));
    }

    #[rstest]
    fn unique_violations_map_to_conflict() {
        let err = map_diesel_error(
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                Box::new("duplicate key value violates unique constraint".to_owned()),
            ),
            "email index insert",
        );
        assert!(err.is_conflict());
    }

    #[rstest]
    fn not_found_maps_onto_the_taxonomy() {
        let err = map_diesel_error(diesel::result::Error::NotFound, "user fetch");
        assert!(err.is_not_found());
    }

    #[rstest]
    fn long_messages_are_clamped() {
        let message = "x".repeat(2 * MAX_STORED_ERROR_LEN);
        assert_eq!(clamp_error_message(&message).len(), MAX_STORED_ERROR_LEN);
    }

    #[rstest]
    fn short_messages_pass_through() {
        assert_eq!(clamp_error_message("duplicate key"), "duplicate key");
    }
}

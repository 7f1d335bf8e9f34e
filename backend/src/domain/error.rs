//! Shared error taxonomy for the sharded data service.
//!
//! Keep this module free from HTTP or driver concerns so the same error
//! shape can be mapped by any adapter (repositories, cache, workers,
//! WebSocket hub). Adapters translate driver failures into exactly one of
//! these variants; callers branch on the variant, never on message text.

use thiserror::Error;

/// Errors surfaced by repositories and services.
///
/// ## Invariants
/// - `NotFound` and `Conflict` are terminal per request and safe to retry
///   idempotently.
/// - `Transient` failures on secondary-index writes are absorbed into the
///   retry queue and never reach callers; on primary writes they propagate.
/// - `Routing` implies misconfiguration and is fatal for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// Missing primary or index row.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Unique-key violation (duplicate email, duplicate collaborator).
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The shard a key maps to is not registered.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Driver, network, or bus failure that may succeed on retry.
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// Malformed input rejected at the boundary (bad enum, unset routing
    /// argument).
    #[error("invariant violated: {message}")]
    Invariant { message: String },

    /// The ID generator observed a backwards clock; the mint failed but the
    /// caller may retry.
    #[error("clock moved backwards by {backwards_ms}ms")]
    Clock { backwards_ms: i64 },
}

impl DataError {
    /// Create a [`DataError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a [`DataError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a [`DataError::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a [`DataError::Invariant`].
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// True when the failure is a unique-key violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True when the failure indicates a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Typed routing failure returned by the shard router.
///
/// Callers must not fall back to another shard: placement is deterministic,
/// so an unroutable key means the topology is misconfigured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No clusters are registered for the entity family at all.
    #[error("no {family} clusters registered")]
    NoClusters { family: &'static str },

    /// The computed cluster slot has no registered database.
    #[error("{family} cluster {index} not registered")]
    UnregisteredCluster { family: &'static str, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn routing_error_converts_into_data_error() {
        let err: DataError = RoutingError::UnregisteredCluster {
            family: "user",
            index: 7,
        }
        .into();
        assert_eq!(err.to_string(), "user cluster 7 not registered");
    }

    #[rstest]
    #[case(DataError::conflict("duplicate email"), true, false)]
    #[case(DataError::not_found("no such list"), false, true)]
    #[case(DataError::transient("connection reset"), false, false)]
    fn classification_helpers(
        #[case] err: DataError,
        #[case] conflict: bool,
        #[case] not_found: bool,
    ) {
        assert_eq!(err.is_conflict(), conflict);
        assert_eq!(err.is_not_found(), not_found);
    }
}

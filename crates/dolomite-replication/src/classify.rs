//! Failure classification.
//!
//! Pure predicates over [`ReplicationError`]; all retry/ignore policy in the
//! write path goes through these so the phases themselves stay free of
//! error-shape knowledge.

use crate::error::ReplicationError;

/// The "shard not available" family: the shard (or its index) is not in a
/// state to take the operation right now, but a later cluster state may fix
/// that.
pub fn shard_not_available(error: &ReplicationError) -> bool {
    matches!(
        error,
        ReplicationError::IndexNotFound { .. }
            | ReplicationError::ShardNotFound { .. }
            | ReplicationError::ShardClosed { .. }
            | ReplicationError::UnavailableShards { .. }
    )
}

/// Should a failed dispatch to the primary be retried from the top?
///
/// True for the explicit retry marker raised by the primary itself and for
/// the shard-not-available family.
pub fn retry_on_primary(error: &ReplicationError) -> bool {
    matches!(error, ReplicationError::RetryOnPrimary { .. }) || shard_not_available(error)
}

/// Should a replica failure be ignored rather than reported?
///
/// Shard-not-available means the copy is gone or moving and the master will
/// reconcile it; a version conflict means the replica already advanced past
/// this write. Neither makes the copy stale.
pub fn ignore_replica_failure(error: &ReplicationError) -> bool {
    shard_not_available(error) || is_conflict(error)
}

/// Version-conflict-class failure?
pub fn is_conflict(error: &ReplicationError) -> bool {
    matches!(error, ReplicationError::VersionConflict { .. })
}

/// Did the dispatch fail before reaching the target node?
pub fn connection_failure(error: &ReplicationError) -> bool {
    matches!(
        error,
        ReplicationError::ConnectFailed { .. }
            | ReplicationError::NodeDisconnected { .. }
            | ReplicationError::NodeClosed { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolomite_types::{NodeId, ShardId};
    use test_case::test_case;

    fn shard() -> ShardId {
        ShardId::new("events", 0)
    }

    fn unavailable() -> ReplicationError {
        ReplicationError::UnavailableShards {
            shard: shard(),
            reason: "primary shard is not active".to_string(),
        }
    }

    fn conflict() -> ReplicationError {
        ReplicationError::VersionConflict {
            shard: shard(),
            reason: "already at version 7".to_string(),
        }
    }

    fn engine_failure() -> ReplicationError {
        ReplicationError::EngineFailure {
            shard: shard(),
            reason: "out of file descriptors".to_string(),
        }
    }

    fn retry_primary() -> ReplicationError {
        ReplicationError::RetryOnPrimary {
            shard: shard(),
            reason: "mapping not visible".to_string(),
        }
    }

    #[test_case(unavailable(), true; "unavailable shards")]
    #[test_case(ReplicationError::ShardNotFound { shard: shard() }, true; "shard not found")]
    #[test_case(ReplicationError::ShardClosed { shard: shard() }, true; "shard closed")]
    #[test_case(ReplicationError::IndexNotFound { index: "events".into() }, true; "index not found")]
    #[test_case(conflict(), false; "version conflict")]
    #[test_case(engine_failure(), false; "engine failure case")]
    fn shard_not_available_family(error: ReplicationError, expected: bool) {
        assert_eq!(shard_not_available(&error), expected);
    }

    #[test_case(retry_primary(), true; "explicit retry marker")]
    #[test_case(unavailable(), true; "shard not available")]
    #[test_case(conflict(), false; "version conflict is terminal on the primary")]
    #[test_case(engine_failure(), false; "engine failure case")]
    fn primary_retry_policy(error: ReplicationError, expected: bool) {
        assert_eq!(retry_on_primary(&error), expected);
    }

    #[test_case(conflict(), true; "replica already advanced")]
    #[test_case(unavailable(), true; "copy is gone or moving")]
    #[test_case(engine_failure(), false; "real failure is reported")]
    #[test_case(retry_primary(), false; "primary marker is not a replica outcome")]
    fn replica_ignore_policy(error: ReplicationError, expected: bool) {
        assert_eq!(ignore_replica_failure(&error), expected);
    }

    #[test]
    fn connection_failures() {
        assert!(connection_failure(&ReplicationError::ConnectFailed {
            node: NodeId::new("node-b")
        }));
        assert!(connection_failure(&ReplicationError::NodeClosed {
            node: NodeId::new("node-b")
        }));
        assert!(!connection_failure(&engine_failure()));
    }
}

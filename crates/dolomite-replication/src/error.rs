//! Replication error taxonomy.
//!
//! One tagged enum covers every failure the write path can produce, so that
//! policy (retry, ignore, report, fail) lives in the pure predicates of
//! [`crate::classify`] rather than in downcast chains at the failure sites.
//! Errors are serializable: replica failures travel back to the coordinator
//! and are embedded in the response's shard summary.

use dolomite_cluster::ClusterError;
use dolomite_types::{NodeId, RestStatus, ShardId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = ReplicationError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ReplicationError {
    #[error("blocked by cluster block: {reason}")]
    ClusterBlocked { reason: String, retryable: bool },

    #[error("blocked by block on index [{index}]: {reason}")]
    IndexBlocked {
        index: String,
        reason: String,
        retryable: bool,
    },

    #[error("no such index [{index}]")]
    IndexNotFound { index: String },

    #[error("alias [{alias}] has more than one write index: {indices:?}")]
    AmbiguousWriteTarget { alias: String, indices: Vec<String> },

    /// The "unavailable shards" failure: shard routing is missing or the
    /// shard cannot currently accept the operation. Always retryable until
    /// the request deadline fires.
    #[error("shard {shard} is not available: {reason}")]
    UnavailableShards { shard: ShardId, reason: String },

    #[error("shard {shard} not found on this node")]
    ShardNotFound { shard: ShardId },

    #[error("shard {shard} is closed")]
    ShardClosed { shard: ShardId },

    /// The primary asked for the whole operation to be re-routed and
    /// retried, e.g. after a mapping update that is not yet visible.
    #[error("retry on primary for shard {shard}: {reason}")]
    RetryOnPrimary { shard: ShardId, reason: String },

    /// The replica cannot apply the operation yet and wants to be re-run
    /// after the next cluster-state change.
    #[error("retry on replica for shard {shard}: {reason}")]
    RetryOnReplica { shard: ShardId, reason: String },

    #[error("failed to connect to node [{node}]")]
    ConnectFailed { node: NodeId },

    #[error("node [{node}] disconnected")]
    NodeDisconnected { node: NodeId },

    #[error("node [{node}] is closing")]
    NodeClosed { node: NodeId },

    #[error("timed out receiving response for [{action}]")]
    ReceiveTimeout { action: String },

    #[error("version conflict on shard {shard}: {reason}")]
    VersionConflict { shard: ShardId, reason: String },

    #[error("failed to parse document: {reason}")]
    DocumentParseFailed { reason: String },

    #[error("failed to update mapping of [{index}] on master: {reason}")]
    MappingUpdateFailed { index: String, reason: String },

    #[error("engine failure on shard {shard}: {reason}")]
    EngineFailure { shard: ShardId, reason: String },

    #[error("task rejected by executor [{executor}]")]
    Rejected { executor: String },

    #[error("invalid replication settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl ReplicationError {
    /// REST status reported for this failure.
    pub fn rest_status(&self) -> RestStatus {
        match self {
            ReplicationError::ClusterBlocked { retryable, .. }
            | ReplicationError::IndexBlocked { retryable, .. } => {
                if *retryable {
                    RestStatus::ServiceUnavailable
                } else {
                    RestStatus::Forbidden
                }
            }
            ReplicationError::IndexNotFound { .. } | ReplicationError::ShardNotFound { .. } => {
                RestStatus::NotFound
            }
            ReplicationError::UnavailableShards { .. }
            | ReplicationError::ShardClosed { .. }
            | ReplicationError::RetryOnPrimary { .. }
            | ReplicationError::RetryOnReplica { .. }
            | ReplicationError::ConnectFailed { .. }
            | ReplicationError::NodeDisconnected { .. }
            | ReplicationError::NodeClosed { .. } => RestStatus::ServiceUnavailable,
            ReplicationError::ReceiveTimeout { .. } => RestStatus::GatewayTimeout,
            ReplicationError::VersionConflict { .. } => RestStatus::Conflict,
            ReplicationError::AmbiguousWriteTarget { .. }
            | ReplicationError::DocumentParseFailed { .. }
            | ReplicationError::InvalidSettings { .. } => RestStatus::BadRequest,
            ReplicationError::Rejected { .. } => RestStatus::TooManyRequests,
            ReplicationError::MappingUpdateFailed { .. }
            | ReplicationError::EngineFailure { .. }
            | ReplicationError::Internal { .. } => RestStatus::InternalServerError,
        }
    }
}

impl From<ClusterError> for ReplicationError {
    fn from(error: ClusterError) -> Self {
        match error {
            ClusterError::IndexNotFound { index } => ReplicationError::IndexNotFound { index },
            ClusterError::AmbiguousWriteTarget { alias, indices } => {
                ReplicationError::AmbiguousWriteTarget { alias, indices }
            }
        }
    }
}

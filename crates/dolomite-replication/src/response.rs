//! Response envelope and the per-shard outcome summary.

use dolomite_types::{NodeId, RestStatus, ShardId};
use serde::{Deserialize, Serialize};

use crate::error::ReplicationError;

/// One failed shard copy, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaFailure {
    pub index: String,
    pub shard: u32,
    /// Node the copy was addressed on. Absent only if the copy had no node
    /// by the time the failure was recorded.
    pub node: Option<NodeId>,
    /// The failure itself. Absent when the target node had already left the
    /// cluster, in which case there is no response to attach.
    pub cause: Option<ReplicationError>,
    pub status: RestStatus,
    /// Always false: primary failures fail the operation instead of being
    /// summarized here.
    pub primary: bool,
}

impl ReplicaFailure {
    pub fn new(
        shard_id: &ShardId,
        node: Option<NodeId>,
        cause: Option<ReplicationError>,
    ) -> Self {
        let status = cause
            .as_ref()
            .map_or(RestStatus::ServiceUnavailable, ReplicationError::rest_status);
        Self {
            index: shard_id.index().to_string(),
            shard: shard_id.number(),
            node,
            cause,
            status,
            primary: false,
        }
    }
}

/// Summary of how many shard copies saw the write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Copies considered: the primary plus every fan-out target plus every
    /// copy that was deliberately skipped.
    pub total: u32,
    /// Copies that applied the write, the primary included.
    pub successful: u32,
    /// Reportable per-copy failures. Ignorable failures (copy moving away,
    /// copy already past this write) do not appear here.
    pub failures: Vec<ReplicaFailure>,
}

/// What the caller ultimately receives: the operation's own reply plus the
/// shard summary composed by the replication phase. Emitted exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationResponse<R> {
    pub reply: R,
    pub shards: ShardInfo,
}

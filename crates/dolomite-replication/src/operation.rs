//! The operation trait the coordination engine is generic over.

use dolomite_cluster::{ClusterState, IndexMetadata};
use dolomite_types::ShardId;

use crate::error::Result;
use crate::request::InternalRequest;

/// What the primary produced: the caller-facing reply and the operation to
/// apply on every replica.
///
/// The replica op is derived from the primary's outcome (typically a
/// version-stamped form of the write) so replicas are deterministic. The
/// reply carries no shard summary; the replication phase composes the final
/// response once fan-out completes.
#[derive(Debug, Clone)]
pub struct PrimaryResult<R, P> {
    pub reply: R,
    pub replica_op: P,
}

/// One kind of write executed through the replication engine.
///
/// Implementations supply the request-specific pieces: how to resolve the
/// request against a cluster state, which shard it targets, and what to do
/// on the primary and on replicas. The engine owns everything else —
/// routing, admission, fan-out, failure accounting, and the terminal reply.
pub trait ReplicatedOperation: Send + Sync + Sized + 'static {
    /// Payload carried by the client request.
    type Request: std::fmt::Debug + Clone + Send + Sync + 'static;
    /// Payload applied on replicas.
    type ReplicaOp: std::fmt::Debug + Clone + Send + Sync + 'static;
    /// Operation-specific reply embedded in the response envelope.
    type Reply: std::fmt::Debug + Clone + Send + 'static;

    /// Action name; transport endpoints are derived from it.
    const NAME: &'static str;

    /// Whether the request's index may be an alias needing resolution.
    fn resolve_index(&self) -> bool {
        true
    }

    /// Whether write-consistency admission applies before the primary op.
    fn check_write_consistency(&self) -> bool {
        true
    }

    /// Request-specific resolution against the observed state. May stamp
    /// routing hints onto the request (e.g. an auto-generated document id).
    /// Runs before the target shard is computed.
    fn resolve_request(
        &self,
        _state: &ClusterState,
        _request: &mut InternalRequest<Self::Request>,
    ) -> Result<()> {
        Ok(())
    }

    /// Computes the shard this request targets.
    fn target_shard(
        &self,
        state: &ClusterState,
        request: &InternalRequest<Self::Request>,
    ) -> Result<ShardId>;

    /// Executes the write on the local primary. Runs with a shard guard
    /// held; the request's shard id is set.
    fn execute_on_primary(
        &self,
        request: &InternalRequest<Self::Request>,
    ) -> Result<PrimaryResult<Self::Reply, Self::ReplicaOp>>;

    /// Applies the replica op on the local copy of `shard_id`.
    fn execute_on_replica(&self, shard_id: &ShardId, op: &Self::ReplicaOp) -> Result<()>;

    /// Whether replicas of this index receive replica writes at all.
    /// Shadow-replica indices share storage with the primary and skip them.
    fn should_execute_replication(&self, index: &IndexMetadata) -> bool {
        !index.settings.shadow_replicas
    }
}

//! Transport seams.
//!
//! Each replicated operation registers three endpoints with the node's
//! transport layer:
//!
//! - `<name>` — the outer endpoint: client requests and re-dispatches from
//!   other coordinators; served by [`crate::Replicator::handle_request`].
//! - `<name>[p]` — the primary endpoint on the node holding the primary;
//!   served by [`crate::Replicator::handle_primary`].
//! - `<name>[r]` — the replica endpoint; served by
//!   [`crate::Replicator::handle_replica`] and registered force-executed so
//!   a loaded pool cannot shed a replica op after the primary committed.
//!
//! The engine consumes the client side of those endpoints through
//! [`Transport`] and serves them through [`ReplyChannel`].

use dolomite_types::NodeId;
use thiserror::Error;

use crate::error::Result;
use crate::operation::ReplicatedOperation;
use crate::request::{ReplicaRequest, ShardedRequest};
use crate::response::ReplicationResponse;

/// One-shot handler for the outcome of a sent request.
pub type ResponseHandler<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Name of the primary endpoint for an action.
pub fn primary_action(name: &str) -> String {
    format!("{name}[p]")
}

/// Name of the replica endpoint for an action.
pub fn replica_action(name: &str) -> String {
    format!("{name}[r]")
}

/// Client side of the three per-action endpoints.
///
/// `send_to_primary` is used even when the primary is local: routing
/// through the transport keeps thread-pool scheduling identical for the
/// local and remote case.
pub trait Transport<Op: ReplicatedOperation>: Send + Sync {
    /// Sends to the outer endpoint: the target node runs its own reroute
    /// phase against its local state.
    fn send_request(
        &self,
        node: &NodeId,
        request: ShardedRequest<Op::Request>,
        handler: ResponseHandler<ReplicationResponse<Op::Reply>>,
    );

    /// Sends to the primary endpoint of the node holding the primary.
    fn send_to_primary(
        &self,
        node: &NodeId,
        request: ShardedRequest<Op::Request>,
        handler: ResponseHandler<ReplicationResponse<Op::Reply>>,
    );

    /// Sends a replica op. The reply is empty on success; a replica never
    /// sends a structured failure, only an error.
    fn send_to_replica(
        &self,
        node: &NodeId,
        request: ReplicaRequest<Op::ReplicaOp>,
        handler: ResponseHandler<()>,
    );
}

/// The connection could not take the response (peer gone, channel torn
/// down). Terminal replies treat this as log-and-move-on: the operation
/// itself still completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reply channel closed")]
pub struct ChannelClosed;

/// Server side of an endpoint: where the terminal reply goes.
pub trait ReplyChannel<T>: Send + Sync {
    fn respond(&self, response: Result<T>) -> std::result::Result<(), ChannelClosed>;
}

//! # dolomite-replication: primary-replica write coordination
//!
//! Executes a write against the primary copy of a shard and fans it out to
//! every active replica, producing a single consistent reply — under node
//! churn, shard moves, primary failover, and evolving mappings.
//!
//! # The three phases
//!
//! ```text
//! Client ──► ReroutePhase ──────► PrimaryPhase ──────► ReplicationPhase ──► reply
//!              │ resolve index      │ admission check     │ fan out to replicas
//!              │ locate primary     │ local primary op    │ tally acks/failures
//!              │ retry on change    │ hand off channel    │ terminal reply, once
//! ```
//!
//! - [`reroute`]: resolves the target shard against the observed cluster
//!   state and dispatches to the node hosting the primary, retrying on
//!   transient problems until the request timeout.
//! - [`primary`]: checks write-consistency admission, runs the operation
//!   locally under a shard guard, and hands channel + guard to replication.
//! - [`replication`]: fans the replica op to all current copy holders
//!   (relocation targets included), accounts successes and failures, and
//!   emits the terminal reply exactly once.
//!
//! The engine is generic over [`ReplicatedOperation`]; [`IndexOperation`]
//! is the document write built on it. External collaborators (transport,
//! shard store, executor, master reporting, mapping propagation) are
//! consumed through traits and wired per node into a [`Replicator`].

mod classify;
mod consistency;
mod driver;
mod engine;
mod error;
mod executor;
mod index_op;
mod operation;
mod primary;
mod replica;
mod replication;
mod request;
mod response;
mod reroute;
mod settings;
mod shard;
mod shard_state;
mod transport;

pub use classify::{
    connection_failure, ignore_replica_failure, is_conflict, retry_on_primary, shard_not_available,
};
pub use consistency::{
    check_write_consistency, required_active_copies, ConsistencyFailure, WriteConsistencyLevel,
};
pub use driver::Replicator;
pub use engine::{
    AppliedWrite, EngineStore, EngineWrite, MappingService, MappingUpdate, PreparedWrite,
    ShardEngine, TranslogDurability, TranslogLocation, WriteOrigin,
};
pub use error::{ReplicationError, Result};
pub use executor::{BackgroundExecutor, CallerThreadExecutor, RejectingExecutor, Task, TaskExecutor};
pub use index_op::{DocumentReply, DocumentWrite, IndexOperation};
pub use operation::{PrimaryResult, ReplicatedOperation};
pub use request::{InternalRequest, ReplicaRequest, ShardedRequest, DEFAULT_TIMEOUT};
pub use response::{ReplicaFailure, ReplicationResponse, ShardInfo};
pub use settings::ReplicationSettings;
pub use shard::{IndexShard, ShardGuard, ShardStore};
pub use shard_state::{ShardFailedListener, ShardFailedOutcome, ShardStateService};
pub use transport::{
    primary_action, replica_action, ChannelClosed, ReplyChannel, ResponseHandler, Transport,
};

#[cfg(test)]
mod tests;

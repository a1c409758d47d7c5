//! Reporting failed shard copies to the master.

use std::time::Duration;

use dolomite_cluster::ShardRouting;
use dolomite_types::IndexUuid;

use crate::error::ReplicationError;

/// How the shard-failed report ended.
///
/// Whatever the outcome, the coordinator accounts the replica as failed
/// locally; the report is about getting the master to reallocate the copy,
/// not about retrying the write.
#[derive(Debug)]
pub enum ShardFailedOutcome {
    /// The master acknowledged the report.
    Acked,
    /// No master is currently elected.
    NoMaster,
    /// The report itself failed in transit (including receive timeout).
    TransportFailure(ReplicationError),
}

pub type ShardFailedListener = Box<dyn FnOnce(ShardFailedOutcome) + Send + 'static>;

/// Master-side shard state reporting.
pub trait ShardStateService: Send + Sync {
    /// Asks the master to mark `routing` as failed. `index_uuid` pins the
    /// index incarnation so a late report cannot hit a re-created index.
    /// `timeout` bounds how long to wait for the master's ack.
    fn shard_failed(
        &self,
        routing: &ShardRouting,
        index_uuid: IndexUuid,
        reason: &str,
        cause: &ReplicationError,
        timeout: Option<Duration>,
        listener: ShardFailedListener,
    );
}

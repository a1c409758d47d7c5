//! Replica-side handler.
//!
//! Applies a replica op on the local copy. A typed retry request from the
//! operation parks the handler on the next cluster-state change with no
//! deadline: failing a healthy copy is far more expensive than a stuck
//! retry, so the wait is unbounded by design. Any other failure is replied
//! to the coordinator as-is (a replica never sends a structured failure),
//! and a non-ignorable one additionally asks the local shard to fail
//! itself, best-effort.

use std::sync::Arc;

use dolomite_cluster::{ClusterStateObserver, StateChange};

use crate::classify;
use crate::driver::Replicator;
use crate::error::{ReplicationError, Result};
use crate::operation::ReplicatedOperation;
use crate::request::ReplicaRequest;
use crate::shard::ShardGuard;
use crate::transport::ReplyChannel;

pub(crate) struct ReplicaPhase<Op: ReplicatedOperation> {
    driver: Replicator<Op>,
    request: ReplicaRequest<Op::ReplicaOp>,
    channel: Arc<dyn ReplyChannel<()>>,
}

impl<Op: ReplicatedOperation> ReplicaPhase<Op> {
    pub(crate) fn start(
        driver: Replicator<Op>,
        request: ReplicaRequest<Op::ReplicaOp>,
        channel: Arc<dyn ReplyChannel<()>>,
    ) {
        let phase = Arc::new(Self {
            driver,
            request,
            channel,
        });
        phase.run();
    }

    fn run(self: Arc<Self>) {
        match self.apply() {
            Ok(()) => self.respond(Ok(())),
            Err(error @ ReplicationError::RetryOnReplica { .. }) => {
                tracing::debug!(
                    action = Op::NAME,
                    shard = %self.request.shard_id(),
                    %error,
                    "replica op not applicable yet, waiting for cluster state change"
                );
                // No deadline on this observer: see the module note.
                let observer = ClusterStateObserver::new(Arc::clone(self.driver.cluster()), None);
                let phase = Arc::clone(&self);
                observer.wait_for_next_change(Box::new(move |change| match change {
                    StateChange::Changed(_) => {
                        let rerun = Arc::clone(&phase);
                        phase
                            .driver
                            .executor()
                            .execute_forced(Box::new(move || rerun.run()));
                    }
                    StateChange::ServiceClosed => {
                        let node = phase
                            .driver
                            .cluster()
                            .current()
                            .nodes
                            .local_node_id()
                            .clone();
                        phase.respond(Err(ReplicationError::NodeClosed { node }));
                    }
                    StateChange::TimedOut => {
                        debug_assert!(false, "replica retry observer has no deadline");
                    }
                }));
            }
            Err(error) => {
                if !classify::ignore_replica_failure(&error) {
                    // Best-effort: the shard may already be gone, in which
                    // case there is nothing left to fail.
                    if let Ok(shard) = self.driver.shards().shard(self.request.shard_id()) {
                        shard.fail_shard("replica write failed", &error);
                    }
                }
                self.respond(Err(error));
            }
        }
    }

    fn apply(&self) -> Result<()> {
        let shard = self.driver.shards().shard(self.request.shard_id())?;
        let guard = ShardGuard::acquire(shard);
        let result = self
            .driver
            .operation()
            .execute_on_replica(self.request.shard_id(), self.request.payload());
        drop(guard);
        result
    }

    fn respond(&self, result: Result<()>) {
        if self.channel.respond(result).is_err() {
            tracing::warn!(
                action = Op::NAME,
                shard = %self.request.shard_id(),
                "failed to send replica response"
            );
        }
    }
}

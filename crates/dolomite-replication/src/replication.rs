//! Replication phase: fan out to replicas and own the terminal reply.
//!
//! Targets are chosen from a fresh state snapshot taken at hand-off.
//! Counters are updated from concurrent transport callbacks; the terminal
//! reply is guarded by a compare-and-set bit so it is emitted exactly once
//! no matter how the callbacks race. Per-replica failures never fail the
//! operation: they are recorded, the copy is reported to the master, and
//! the write still completes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dolomite_cluster::{ClusterState, IndexMetadata, ShardRouting};
use dolomite_types::{IndexUuid, NodeId, ShardId};

use crate::classify;
use crate::driver::Replicator;
use crate::error::Result;
use crate::operation::{PrimaryResult, ReplicatedOperation};
use crate::request::ReplicaRequest;
use crate::response::{ReplicaFailure, ReplicationResponse, ShardInfo};
use crate::shard::ShardGuard;
use crate::shard_state::ShardFailedOutcome;
use crate::transport::ReplyChannel;

pub(crate) struct ReplicationPhase<Op: ReplicatedOperation> {
    driver: Replicator<Op>,
    replica_request: ReplicaRequest<Op::ReplicaOp>,
    /// Taken once by the terminal reply.
    reply: Mutex<Option<Op::Reply>>,
    shard_id: ShardId,
    index_uuid: IndexUuid,
    state: Arc<ClusterState>,
    channel: Arc<dyn ReplyChannel<ReplicationResponse<Op::Reply>>>,
    guard: ShardGuard,
    targets: Vec<(ShardRouting, NodeId)>,
    total: u32,
    pending: AtomicU32,
    success: AtomicU32,
    ignored: AtomicU32,
    failures: Mutex<Vec<ReplicaFailure>>,
    finished: AtomicBool,
}

impl<Op: ReplicatedOperation> ReplicationPhase<Op> {
    pub(crate) fn start(
        driver: Replicator<Op>,
        primary: PrimaryResult<Op::Reply, Op::ReplicaOp>,
        shard_id: ShardId,
        index_meta: IndexMetadata,
        channel: Arc<dyn ReplyChannel<ReplicationResponse<Op::Reply>>>,
        guard: ShardGuard,
    ) {
        let state = driver.cluster().current();
        let local = state.nodes.local_node_id().clone();
        let execute_on_replica = driver.operation().should_execute_replication(&index_meta);

        let mut targets = Vec::new();
        let mut ignored = 0u32;
        if let Some(table) = state.routing.shard_table(&shard_id) {
            for shard in table.iter() {
                if shard.unassigned_state() {
                    ignored += 1;
                    continue;
                }
                if !shard.primary && !execute_on_replica {
                    // Shadow replicas share storage with the primary; they
                    // are counted but never dispatched to.
                    ignored += 1;
                    continue;
                }
                if let Some(node) = &shard.current_node {
                    if *node != local {
                        targets.push((shard.clone(), node.clone()));
                    }
                }
                // A relocating copy is applied on both ends of the move.
                if shard.relocating_state() {
                    if let Some(node) = &shard.relocating_node {
                        if *node != local {
                            targets.push((shard.clone(), node.clone()));
                        }
                    }
                }
            }
        }

        let pending = targets.len() as u32;
        let total = 1 + pending + ignored;

        let phase = Arc::new(Self {
            driver,
            replica_request: ReplicaRequest::new(shard_id.clone(), primary.replica_op),
            reply: Mutex::new(Some(primary.reply)),
            shard_id,
            index_uuid: index_meta.uuid,
            state,
            channel,
            guard,
            targets,
            total,
            pending: AtomicU32::new(pending),
            success: AtomicU32::new(1),
            ignored: AtomicU32::new(ignored),
            failures: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        });
        phase.run();
    }

    fn run(self: Arc<Self>) {
        tracing::trace!(
            action = Op::NAME,
            shard = %self.shard_id,
            total = self.total,
            pending = self.pending.load(Ordering::SeqCst),
            "starting replication"
        );
        if self.pending.load(Ordering::SeqCst) == 0 {
            self.finish();
            return;
        }

        for (routing, node) in &self.targets {
            if !self.state.nodes.contains(node) {
                // The target left the cluster between the primary op and
                // fan-out; account it as failed with no response attached.
                self.record_failure(ReplicaFailure::new(
                    &self.shard_id,
                    Some(node.clone()),
                    None,
                ));
                self.decrement_pending();
                continue;
            }
            let phase = Arc::clone(&self);
            let reply_routing = routing.clone();
            let reply_node = node.clone();
            self.driver.transport().send_to_replica(
                node,
                self.replica_request.clone(),
                Box::new(move |result| phase.on_replica_reply(reply_routing, reply_node, result)),
            );
        }
    }

    fn on_replica_reply(self: Arc<Self>, routing: ShardRouting, node: NodeId, result: Result<()>) {
        match result {
            Ok(()) => {
                self.success.fetch_add(1, Ordering::SeqCst);
                self.decrement_pending();
            }
            Err(error) if classify::ignore_replica_failure(&error) => {
                // The copy is moving away or already past this write;
                // neither makes it stale, so nothing is recorded.
                tracing::trace!(
                    action = Op::NAME,
                    shard = %self.shard_id,
                    node = %node,
                    %error,
                    "ignoring replica failure"
                );
                self.ignored.fetch_add(1, Ordering::SeqCst);
                self.decrement_pending();
            }
            Err(error) => {
                tracing::warn!(
                    action = Op::NAME,
                    shard = %self.shard_id,
                    node = %node,
                    %error,
                    "replica operation failed, failing the copy on the master"
                );
                self.record_failure(ReplicaFailure::new(
                    &self.shard_id,
                    Some(node.clone()),
                    Some(error.clone()),
                ));

                // Whatever the master answers, the copy stays accounted as
                // failed here; the report is not a retry of the write.
                let phase = Arc::clone(&self);
                let reason = format!("failed to perform [{}] on replica", Op::NAME);
                self.driver.shard_state().shard_failed(
                    &routing,
                    self.index_uuid,
                    &reason,
                    &error,
                    self.driver.settings().shard_failure_timeout(),
                    Box::new(move |outcome| {
                        match outcome {
                            ShardFailedOutcome::Acked => {}
                            ShardFailedOutcome::NoMaster => {
                                tracing::warn!(
                                    shard = %phase.shard_id,
                                    node = %node,
                                    "no master to report the failed replica to"
                                );
                            }
                            ShardFailedOutcome::TransportFailure(report_error) => {
                                tracing::warn!(
                                    shard = %phase.shard_id,
                                    node = %node,
                                    error = %report_error,
                                    "failed to report the failed replica to the master"
                                );
                            }
                        }
                        phase.decrement_pending();
                    }),
                );
            }
        }
    }

    fn record_failure(&self, failure: ReplicaFailure) {
        self.failures.lock().expect("failures lock").push(failure);
    }

    fn decrement_pending(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.finish();
        }
    }

    /// The single terminal reply.
    fn finish(&self) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug_assert!(false, "replication phase terminated twice");
            return;
        }

        self.guard.release();

        let failures = std::mem::take(&mut *self.failures.lock().expect("failures lock"));
        let successful = self.success.load(Ordering::SeqCst);
        debug_assert_eq!(
            successful + failures.len() as u32 + self.ignored.load(Ordering::SeqCst),
            self.total,
            "replication accounting must cover every copy"
        );

        let Some(reply) = self.reply.lock().expect("reply lock").take() else {
            debug_assert!(false, "terminal reply taken twice");
            return;
        };
        let response = ReplicationResponse {
            reply,
            shards: ShardInfo {
                total: self.total,
                successful,
                failures,
            },
        };
        if self.channel.respond(Ok(response)).is_err() {
            // The operation itself is complete; only the reply was lost.
            tracing::warn!(
                action = Op::NAME,
                shard = %self.shard_id,
                "failed to send replication response"
            );
        }
    }
}

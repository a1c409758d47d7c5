//! Primary phase: admit, execute locally, hand off to replication.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::classify;
use crate::consistency;
use crate::driver::Replicator;
use crate::error::ReplicationError;
use crate::operation::ReplicatedOperation;
use crate::replication::ReplicationPhase;
use crate::request::{InternalRequest, ShardedRequest};
use crate::response::ReplicationResponse;
use crate::shard::ShardGuard;
use crate::transport::ReplyChannel;

pub(crate) struct PrimaryPhase<Op: ReplicatedOperation> {
    driver: Replicator<Op>,
    internal: InternalRequest<Op::Request>,
    channel: Arc<dyn ReplyChannel<ReplicationResponse<Op::Reply>>>,
    finished: AtomicBool,
}

impl<Op: ReplicatedOperation> PrimaryPhase<Op> {
    pub(crate) fn new(
        driver: Replicator<Op>,
        request: ShardedRequest<Op::Request>,
        channel: Arc<dyn ReplyChannel<ReplicationResponse<Op::Reply>>>,
    ) -> Self {
        // The shard id is authoritative here; its index is the concrete one
        // the reroute phase resolved.
        let concrete_index = request
            .shard_id()
            .map_or_else(|| request.index().to_string(), |s| s.index().to_string());
        Self {
            driver,
            internal: InternalRequest::new(request, concrete_index),
            channel,
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn run(self) {
        // One stable snapshot for admission and the replication hand-off.
        let state = self.driver.cluster().current();

        let Some(shard_id) = self.internal.request().shard_id().cloned() else {
            self.finish_failure(ReplicationError::Internal {
                reason: "request reached the primary endpoint without a shard id".to_string(),
            });
            return;
        };

        // Write-consistency admission. Failing it is retryable: the reroute
        // side sees UnavailableShards and waits for the next state.
        if self.driver.operation().check_write_consistency() {
            let level = self
                .driver
                .settings()
                .resolve_consistency(self.internal.request().consistency());
            let Some(table) = state.routing.shard_table(&shard_id) else {
                self.finish_failure(ReplicationError::UnavailableShards {
                    shard: shard_id,
                    reason: "no routing table for shard on the primary".to_string(),
                });
                return;
            };
            if let Err(failure) = consistency::check_write_consistency(table, level) {
                tracing::trace!(
                    action = Op::NAME,
                    shard = %shard_id,
                    %failure,
                    "rejecting write for consistency"
                );
                self.finish_failure(ReplicationError::UnavailableShards {
                    shard: shard_id,
                    reason: failure.to_string(),
                });
                return;
            }
        }

        // Pin the shard open for the rest of the operation.
        let shard = match self.driver.shards().shard(&shard_id) {
            Ok(shard) => shard,
            Err(error) => {
                self.finish_failure(error);
                return;
            }
        };
        let guard = ShardGuard::acquire(shard);

        let result = self.driver.operation().execute_on_primary(&self.internal);
        match result {
            Err(error) => {
                if classify::is_conflict(&error) {
                    tracing::trace!(action = Op::NAME, shard = %shard_id, %error, "primary operation failed");
                } else {
                    tracing::debug!(action = Op::NAME, shard = %shard_id, %error, "primary operation failed");
                }
                drop(guard);
                self.finish_failure(error);
            }
            Ok(primary) => {
                let Some(index_meta) = state.metadata.index(shard_id.index()).cloned() else {
                    drop(guard);
                    self.finish_failure(ReplicationError::IndexNotFound {
                        index: shard_id.index().to_string(),
                    });
                    return;
                };
                // Hand off. Channel and guard move to the replication
                // phase; this phase must not touch either afterwards.
                if self
                    .finished
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug_assert!(false, "primary phase terminated twice");
                    return;
                }
                ReplicationPhase::start(
                    self.driver,
                    primary,
                    shard_id,
                    index_meta,
                    self.channel,
                    guard,
                );
            }
        }
    }

    fn finish_failure(&self, error: ReplicationError) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug_assert!(false, "primary phase terminated twice");
            return;
        }
        if self.channel.respond(Err(error)).is_err() {
            tracing::warn!(action = Op::NAME, "failed to send primary failure");
        }
    }
}

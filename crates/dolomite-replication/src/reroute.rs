//! Reroute phase: locate the primary and get the request to it.
//!
//! Every decision in one attempt is made against a single observed state
//! snapshot. Anything that looks transient — blocks flagged retryable, a
//! missing index or primary, an inactive primary, a dead connection —
//! parks the phase on the cluster-state observer and re-runs the whole
//! attempt against the next state. The observer's deadline comes from the
//! request timeout; when it fires, the phase gets exactly one more attempt,
//! and the latched `timed_out` flag makes the retry after that terminal.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dolomite_cluster::{ClusterBlockLevel, ClusterState, ClusterStateObserver, StateChange};
use dolomite_types::{NodeId, ShardId};

use crate::classify;
use crate::driver::Replicator;
use crate::error::{ReplicationError, Result};
use crate::operation::ReplicatedOperation;
use crate::request::{InternalRequest, ShardedRequest};
use crate::response::ReplicationResponse;
use crate::transport::ResponseHandler;

pub(crate) struct ReroutePhase<Op: ReplicatedOperation> {
    driver: Replicator<Op>,
    /// The request as of the latest attempt. Mutations made while resolving
    /// (stamped shard id, routing hints) are persisted here so retries see
    /// them and resolution stays one-shot.
    request: Mutex<ShardedRequest<Op::Request>>,
    observer: ClusterStateObserver,
    listener: Mutex<Option<ResponseHandler<ReplicationResponse<Op::Reply>>>>,
    finished: AtomicBool,
}

impl<Op: ReplicatedOperation> ReroutePhase<Op> {
    pub(crate) fn start(
        driver: Replicator<Op>,
        request: ShardedRequest<Op::Request>,
        listener: ResponseHandler<ReplicationResponse<Op::Reply>>,
    ) {
        let observer =
            ClusterStateObserver::new(Arc::clone(driver.cluster()), Some(request.timeout()));
        let phase = Arc::new(Self {
            driver,
            request: Mutex::new(request),
            observer,
            listener: Mutex::new(Some(listener)),
            finished: AtomicBool::new(false),
        });
        phase.run();
    }

    /// One attempt against the currently observed state.
    fn run(self: Arc<Self>) {
        let state = self.observer.observed_state();

        // Global write block.
        if let Some(block) = state.blocks.global_block(ClusterBlockLevel::Write) {
            let failure = ReplicationError::ClusterBlocked {
                reason: block.description.clone(),
                retryable: block.retryable,
            };
            if block.retryable {
                self.retry(failure);
            } else {
                self.finish_failure(failure);
            }
            return;
        }

        // Resolve the concrete index.
        let index_name = self
            .request
            .lock()
            .expect("request lock")
            .index()
            .to_string();
        let concrete_index = if self.driver.operation().resolve_index() {
            match state.metadata.resolve_write_index(&index_name) {
                Ok(index) => index.name.clone(),
                Err(error) => {
                    let failure = ReplicationError::from(error);
                    if classify::shard_not_available(&failure) {
                        self.retry(failure);
                    } else {
                        self.finish_failure(failure);
                    }
                    return;
                }
            }
        } else {
            index_name
        };

        // Index-level write block.
        if let Some(block) = state
            .blocks
            .index_block(&concrete_index, ClusterBlockLevel::Write)
        {
            let failure = ReplicationError::IndexBlocked {
                index: concrete_index,
                reason: block.description.clone(),
                retryable: block.retryable,
            };
            if block.retryable {
                self.retry(failure);
            } else {
                self.finish_failure(failure);
            }
            return;
        }

        // Request-specific resolution and one-shot shard id assignment.
        let mut internal = InternalRequest::new(
            self.request.lock().expect("request lock").clone(),
            concrete_index,
        );
        if let Err(error) = self.resolve(&state, &mut internal) {
            if classify::shard_not_available(&error) {
                self.retry(error);
            } else {
                self.finish_failure(error);
            }
            return;
        }
        // Persist before the routing checks: a retry must reuse the same
        // resolution (same generated ids, same shard id).
        *self.request.lock().expect("request lock") = internal.request().clone();

        let shard_id = internal
            .request()
            .shard_id()
            .cloned()
            .expect("shard id stamped during resolution");

        // Locate an active, reachable primary in the observed state.
        let primary_node = match Self::locate_primary(&state, &shard_id, internal.request()) {
            Ok(node) => node,
            Err(failure) => {
                self.retry(failure);
                return;
            }
        };

        // Dispatch: the primary endpoint locally, the outer endpoint on a
        // remote coordinator.
        let local = state.nodes.local_node_id() == &primary_node;
        let request = internal.into_request();
        let phase = Arc::clone(&self);
        let reply_node = primary_node.clone();
        let handler: ResponseHandler<ReplicationResponse<Op::Reply>> =
            Box::new(move |result| phase.on_dispatch_reply(local, reply_node, result));

        tracing::trace!(
            action = Op::NAME,
            shard = %shard_id,
            node = %primary_node,
            local,
            "dispatching to primary"
        );
        if local {
            self.driver
                .transport()
                .send_to_primary(&primary_node, request, handler);
        } else {
            self.driver
                .transport()
                .send_request(&primary_node, request, handler);
        }
    }

    fn resolve(
        &self,
        state: &ClusterState,
        internal: &mut InternalRequest<Op::Request>,
    ) -> Result<()> {
        self.driver.operation().resolve_request(state, internal)?;
        if internal.request().shard_id().is_none() {
            let shard_id = self.driver.operation().target_shard(state, internal)?;
            internal.request_mut().set_shard_id(shard_id);
        }
        Ok(())
    }

    /// Finds the node hosting an active primary, or the retryable
    /// "unavailable shards" failure describing what is missing.
    fn locate_primary(
        state: &ClusterState,
        shard_id: &ShardId,
        request: &ShardedRequest<Op::Request>,
    ) -> Result<NodeId> {
        let unavailable = |reason: &str| ReplicationError::UnavailableShards {
            shard: shard_id.clone(),
            reason: format!(
                "{reason}; timeout [{:?}], request [{} {:?}]",
                request.timeout(),
                Op::NAME,
                request.payload()
            ),
        };

        let index_routing = state
            .routing
            .index(shard_id.index())
            .ok_or_else(|| unavailable("no routing table for index"))?;
        let shard_table = index_routing
            .shard(shard_id.number())
            .ok_or_else(|| unavailable("no routing table for shard"))?;
        let primary = shard_table
            .primary()
            .ok_or_else(|| unavailable("no primary copy"))?;
        if !primary.active() {
            return Err(unavailable("primary shard is not active"));
        }
        let node = primary
            .current_node
            .clone()
            .ok_or_else(|| unavailable("primary shard is not assigned"))?;
        if !state.nodes.contains(&node) {
            return Err(unavailable("primary shard is assigned to an unknown node"));
        }
        Ok(node)
    }

    fn on_dispatch_reply(
        self: Arc<Self>,
        primary_dispatch: bool,
        node: NodeId,
        result: Result<ReplicationResponse<Op::Reply>>,
    ) {
        match result {
            Ok(response) => self.finish_success(response),
            Err(error) => {
                let retryable = classify::connection_failure(&error)
                    || (primary_dispatch && classify::retry_on_primary(&error));
                if retryable {
                    tracing::debug!(
                        action = Op::NAME,
                        node = %node,
                        error = %error,
                        "retrying after dispatch failure"
                    );
                    self.retry(error);
                } else {
                    self.finish_failure(error);
                }
            }
        }
    }

    /// Parks the phase until the next cluster-state change.
    fn retry(self: Arc<Self>, failure: ReplicationError) {
        if self.observer.is_timed_out() {
            // The last attempt after the deadline already ran; this failure
            // is final.
            self.finish_failure(failure);
            return;
        }
        tracing::trace!(action = Op::NAME, failure = %failure, "waiting for cluster state change");
        let phase = Arc::clone(&self);
        self.observer.wait_for_next_change(Box::new(move |change| {
            match change {
                StateChange::Changed(state) => {
                    tracing::trace!(
                        action = Op::NAME,
                        version = state.version,
                        "retrying against new cluster state"
                    );
                    phase.run();
                }
                // One more attempt: a recovery racing the deadline still
                // gets its chance. The observer has latched timed_out, so
                // the next retry is terminal.
                StateChange::TimedOut => phase.run(),
                StateChange::ServiceClosed => {
                    let node = phase
                        .observer
                        .observed_state()
                        .nodes
                        .local_node_id()
                        .clone();
                    phase.finish_failure(ReplicationError::NodeClosed { node });
                }
            }
        }));
    }

    fn finish_success(&self, response: ReplicationResponse<Op::Reply>) {
        self.finish(Ok(response));
    }

    fn finish_failure(&self, error: ReplicationError) {
        self.finish(Err(error));
    }

    fn finish(&self, result: Result<ReplicationResponse<Op::Reply>>) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug_assert!(false, "reroute phase terminated twice");
            return;
        }
        if let Some(listener) = self.listener.lock().expect("listener lock").take() {
            listener(result);
        }
    }
}

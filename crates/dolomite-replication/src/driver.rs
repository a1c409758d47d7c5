//! The per-action coordination driver.
//!
//! One [`Replicator`] exists per registered action per node. It owns the
//! wiring (cluster service, transport, shard store, executor, settings) and
//! serves the action's three transport endpoints; the actual control flow
//! lives in the phase modules. The handle is a cheap clone around a shared
//! inner, so phases and callbacks carry it by value.

use std::sync::Arc;

use dolomite_cluster::ClusterService;

use crate::executor::TaskExecutor;
use crate::operation::ReplicatedOperation;
use crate::primary::PrimaryPhase;
use crate::replica::ReplicaPhase;
use crate::request::{ReplicaRequest, ShardedRequest};
use crate::reroute::ReroutePhase;
use crate::response::ReplicationResponse;
use crate::settings::ReplicationSettings;
use crate::shard::ShardStore;
use crate::shard_state::ShardStateService;
use crate::transport::{ReplyChannel, ResponseHandler, Transport};

struct Driver<Op: ReplicatedOperation> {
    operation: Op,
    settings: ReplicationSettings,
    cluster: Arc<ClusterService>,
    transport: Arc<dyn Transport<Op>>,
    shards: Arc<dyn ShardStore>,
    shard_state: Arc<dyn ShardStateService>,
    executor: Arc<dyn TaskExecutor>,
}

/// Coordinates one kind of replicated write across the cluster.
pub struct Replicator<Op: ReplicatedOperation> {
    inner: Arc<Driver<Op>>,
}

impl<Op: ReplicatedOperation> Clone for Replicator<Op> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Op: ReplicatedOperation> Replicator<Op> {
    pub fn new(
        operation: Op,
        settings: ReplicationSettings,
        cluster: Arc<ClusterService>,
        transport: Arc<dyn Transport<Op>>,
        shards: Arc<dyn ShardStore>,
        shard_state: Arc<dyn ShardStateService>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(Driver {
                operation,
                settings,
                cluster,
                transport,
                shards,
                shard_state,
                executor,
            }),
        }
    }

    pub(crate) fn operation(&self) -> &Op {
        &self.inner.operation
    }

    pub(crate) fn settings(&self) -> &ReplicationSettings {
        &self.inner.settings
    }

    pub(crate) fn cluster(&self) -> &Arc<ClusterService> {
        &self.inner.cluster
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport<Op>> {
        &self.inner.transport
    }

    pub(crate) fn shards(&self) -> &Arc<dyn ShardStore> {
        &self.inner.shards
    }

    pub(crate) fn shard_state(&self) -> &Arc<dyn ShardStateService> {
        &self.inner.shard_state
    }

    pub(crate) fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.inner.executor
    }

    /// Executes a request on behalf of a local caller. The listener fires
    /// exactly once with the terminal outcome.
    pub fn execute(
        &self,
        request: ShardedRequest<Op::Request>,
        listener: ResponseHandler<ReplicationResponse<Op::Reply>>,
    ) {
        ReroutePhase::start(self.clone(), request, listener);
    }

    /// Serves the outer endpoint `<name>`: incoming client requests and
    /// re-dispatches from other coordinators.
    pub fn handle_request(
        &self,
        request: ShardedRequest<Op::Request>,
        channel: Arc<dyn ReplyChannel<ReplicationResponse<Op::Reply>>>,
    ) {
        self.execute(
            request,
            Box::new(move |result| {
                if channel.respond(result).is_err() {
                    tracing::warn!(action = Op::NAME, "failed to send reroute response");
                }
            }),
        );
    }

    /// Serves the primary endpoint `<name>[p]` on the node holding the
    /// primary. The request carries the resolved shard id.
    pub fn handle_primary(
        &self,
        request: ShardedRequest<Op::Request>,
        channel: Arc<dyn ReplyChannel<ReplicationResponse<Op::Reply>>>,
    ) {
        let driver = self.clone();
        let task_channel = Arc::clone(&channel);
        let result = self.inner.executor.try_execute(Box::new(move || {
            PrimaryPhase::new(driver, request, task_channel).run();
        }));
        if let Err(rejected) = result {
            tracing::debug!(action = Op::NAME, error = %rejected, "primary task rejected");
            if channel.respond(Err(rejected)).is_err() {
                tracing::warn!(action = Op::NAME, "failed to send rejection response");
            }
        }
    }

    /// Serves the replica endpoint `<name>[r]`. Force-executed: a replica
    /// op must not be shed after the primary committed.
    pub fn handle_replica(
        &self,
        request: ReplicaRequest<Op::ReplicaOp>,
        channel: Arc<dyn ReplyChannel<()>>,
    ) {
        let driver = self.clone();
        self.inner.executor.execute_forced(Box::new(move || {
            ReplicaPhase::start(driver, request, channel);
        }));
    }
}

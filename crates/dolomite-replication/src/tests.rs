//! Integration tests for the write coordination engine.
//!
//! Everything runs in-process and inline: a scripted transport loops the
//! primary endpoint back into the driver, replica replies are canned per
//! node, and cluster-state changes are injected by publishing new snapshots
//! into the [`ClusterService`]. With the caller-thread executor the whole
//! operation completes synchronously, so the assertions below see the final
//! accounting immediately.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dolomite_cluster::{
    ClusterBlock, ClusterBlockLevel, ClusterBlocks, ClusterService, ClusterState, DiscoveryNode,
    DiscoveryNodes, IndexMetadata, IndexRoutingTable, IndexSettings, IndexShardRoutingTable,
    Metadata, RoutingTable, ShardRouting,
};
use dolomite_types::{IndexUuid, NodeId, RestStatus, ShardId, Version, VersionType};

use crate::engine::{
    AppliedWrite, EngineStore, EngineWrite, MappingService, MappingUpdate, PreparedWrite,
    ShardEngine, TranslogDurability, TranslogLocation,
};
use crate::error::{ReplicationError, Result};
use crate::executor::{CallerThreadExecutor, RejectingExecutor, TaskExecutor};
use crate::index_op::{DocumentWrite, IndexOperation};
use crate::operation::{PrimaryResult, ReplicatedOperation};
use crate::request::{InternalRequest, ReplicaRequest, ShardedRequest};
use crate::response::ReplicationResponse;
use crate::settings::ReplicationSettings;
use crate::shard::{IndexShard, ShardStore};
use crate::shard_state::{ShardFailedListener, ShardFailedOutcome, ShardStateService};
use crate::transport::{ChannelClosed, ReplyChannel, ResponseHandler, Transport};
use crate::{Replicator, WriteConsistencyLevel};

const LOCAL: &str = "node-0";

// ============================================================================
// Test Operation
// ============================================================================

#[derive(Debug, Clone)]
struct TestDoc;

/// A minimal operation: one shard per index, scripted outcomes.
struct TestOp {
    primary_failures: Mutex<VecDeque<ReplicationError>>,
    replica_failures: Mutex<VecDeque<ReplicationError>>,
}

impl TestOp {
    fn new() -> Self {
        Self {
            primary_failures: Mutex::new(VecDeque::new()),
            replica_failures: Mutex::new(VecDeque::new()),
        }
    }

    fn failing_first(failures: Vec<ReplicationError>) -> Self {
        Self {
            primary_failures: Mutex::new(failures.into()),
            replica_failures: Mutex::new(VecDeque::new()),
        }
    }

    fn failing_replica(failures: Vec<ReplicationError>) -> Self {
        Self {
            primary_failures: Mutex::new(VecDeque::new()),
            replica_failures: Mutex::new(failures.into()),
        }
    }
}

impl ReplicatedOperation for TestOp {
    type Request = TestDoc;
    type ReplicaOp = TestDoc;
    type Reply = &'static str;

    const NAME: &'static str = "indices:data/write/test";

    fn target_shard(
        &self,
        _state: &ClusterState,
        request: &InternalRequest<Self::Request>,
    ) -> Result<ShardId> {
        Ok(ShardId::new(request.concrete_index(), 0))
    }

    fn execute_on_primary(
        &self,
        _request: &InternalRequest<Self::Request>,
    ) -> Result<PrimaryResult<Self::Reply, Self::ReplicaOp>> {
        if let Some(failure) = self.primary_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        Ok(PrimaryResult {
            reply: "indexed",
            replica_op: TestDoc,
        })
    }

    fn execute_on_replica(&self, _shard_id: &ShardId, _op: &Self::ReplicaOp) -> Result<()> {
        if let Some(failure) = self.replica_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        Ok(())
    }
}

// ============================================================================
// Harness: channels, transport, shards, shard-state reporting
// ============================================================================

/// Adapts a one-shot response handler into a reply channel.
struct HandlerChannel<T> {
    handler: Mutex<Option<ResponseHandler<T>>>,
}

impl<T> HandlerChannel<T> {
    fn new(handler: ResponseHandler<T>) -> Self {
        Self {
            handler: Mutex::new(Some(handler)),
        }
    }
}

impl<T: Send + 'static> ReplyChannel<T> for HandlerChannel<T> {
    fn respond(&self, response: Result<T>) -> std::result::Result<(), ChannelClosed> {
        match self.handler.lock().unwrap().take() {
            Some(handler) => {
                handler(response);
                Ok(())
            }
            None => Err(ChannelClosed),
        }
    }
}

#[derive(Clone)]
enum ReplicaBehavior {
    Ack,
    Fail(ReplicationError),
}

/// Loopback transport: primary sends re-enter the local driver, replica
/// sends answer from a per-node script.
struct TestTransport<Op: ReplicatedOperation> {
    driver: Mutex<Option<Replicator<Op>>>,
    replicas: Mutex<HashMap<NodeId, ReplicaBehavior>>,
    replica_sends: Mutex<Vec<(NodeId, ReplicaRequest<Op::ReplicaOp>)>>,
}

impl<Op: ReplicatedOperation> TestTransport<Op> {
    fn new() -> Self {
        Self {
            driver: Mutex::new(None),
            replicas: Mutex::new(HashMap::new()),
            replica_sends: Mutex::new(Vec::new()),
        }
    }

    fn wire(&self, driver: Replicator<Op>) {
        *self.driver.lock().unwrap() = Some(driver);
    }

    fn script_replica(&self, node: &str, behavior: ReplicaBehavior) {
        self.replicas
            .lock()
            .unwrap()
            .insert(NodeId::new(node), behavior);
    }

    fn replica_targets(&self) -> Vec<NodeId> {
        self.replica_sends
            .lock()
            .unwrap()
            .iter()
            .map(|(node, _)| node.clone())
            .collect()
    }
}

impl<Op: ReplicatedOperation> Transport<Op> for TestTransport<Op> {
    fn send_request(
        &self,
        node: &NodeId,
        _request: ShardedRequest<Op::Request>,
        handler: ResponseHandler<ReplicationResponse<Op::Reply>>,
    ) {
        // No remote coordinators in this harness.
        handler(Err(ReplicationError::ConnectFailed { node: node.clone() }));
    }

    fn send_to_primary(
        &self,
        _node: &NodeId,
        request: ShardedRequest<Op::Request>,
        handler: ResponseHandler<ReplicationResponse<Op::Reply>>,
    ) {
        let driver = self
            .driver
            .lock()
            .unwrap()
            .clone()
            .expect("transport wired to a driver");
        driver.handle_primary(request, Arc::new(HandlerChannel::new(handler)));
    }

    fn send_to_replica(
        &self,
        node: &NodeId,
        request: ReplicaRequest<Op::ReplicaOp>,
        handler: ResponseHandler<()>,
    ) {
        self.replica_sends
            .lock()
            .unwrap()
            .push((node.clone(), request));
        let behavior = self
            .replicas
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or(ReplicaBehavior::Ack);
        match behavior {
            ReplicaBehavior::Ack => handler(Ok(())),
            ReplicaBehavior::Fail(error) => handler(Err(error)),
        }
    }
}

#[derive(Default)]
struct TestShard {
    operations: AtomicI64,
    failed: Mutex<Option<String>>,
}

impl IndexShard for TestShard {
    fn increment_operations(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_operations(&self) {
        self.operations.fetch_sub(1, Ordering::SeqCst);
    }

    fn fail_shard(&self, reason: &str, _cause: &ReplicationError) {
        *self.failed.lock().unwrap() = Some(reason.to_string());
    }
}

#[derive(Default)]
struct TestShards {
    shards: Mutex<HashMap<ShardId, Arc<TestShard>>>,
}

impl TestShards {
    fn handle(&self, shard_id: &ShardId) -> Arc<TestShard> {
        Arc::clone(
            self.shards
                .lock()
                .unwrap()
                .entry(shard_id.clone())
                .or_default(),
        )
    }
}

impl ShardStore for TestShards {
    fn shard(&self, shard_id: &ShardId) -> Result<Arc<dyn IndexShard>> {
        Ok(self.handle(shard_id))
    }
}

#[derive(Clone, Copy)]
enum MasterOutcome {
    Acked,
    NoMaster,
    ReportTimeout,
}

struct TestShardState {
    outcome: Mutex<MasterOutcome>,
    calls: Mutex<Vec<(ShardRouting, Option<Duration>)>>,
}

impl TestShardState {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(MasterOutcome::Acked),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ShardStateService for TestShardState {
    fn shard_failed(
        &self,
        routing: &ShardRouting,
        _index_uuid: IndexUuid,
        _reason: &str,
        _cause: &ReplicationError,
        timeout: Option<Duration>,
        listener: ShardFailedListener,
    ) {
        self.calls.lock().unwrap().push((routing.clone(), timeout));
        let outcome = match *self.outcome.lock().unwrap() {
            MasterOutcome::Acked => ShardFailedOutcome::Acked,
            MasterOutcome::NoMaster => ShardFailedOutcome::NoMaster,
            MasterOutcome::ReportTimeout => {
                ShardFailedOutcome::TransportFailure(ReplicationError::ReceiveTimeout {
                    action: "internal:cluster/shard/failure".to_string(),
                })
            }
        };
        listener(outcome);
    }
}

// ============================================================================
// Harness: environment and state builders
// ============================================================================

struct TestEnv<Op: ReplicatedOperation> {
    cluster: Arc<ClusterService>,
    transport: Arc<TestTransport<Op>>,
    shards: Arc<TestShards>,
    shard_state: Arc<TestShardState>,
    driver: Replicator<Op>,
}

fn build_env<Op: ReplicatedOperation>(
    operation: Op,
    settings: ReplicationSettings,
    initial: ClusterState,
    executor: Arc<dyn TaskExecutor>,
) -> TestEnv<Op> {
    let cluster = Arc::new(ClusterService::new(initial));
    let transport = Arc::new(TestTransport::new());
    let shards = Arc::new(TestShards::default());
    let shard_state = Arc::new(TestShardState::new());
    let driver = Replicator::new(
        operation,
        settings,
        Arc::clone(&cluster),
        Arc::clone(&transport) as Arc<dyn Transport<Op>>,
        Arc::clone(&shards) as Arc<dyn ShardStore>,
        Arc::clone(&shard_state) as Arc<dyn ShardStateService>,
        executor,
    );
    transport.wire(driver.clone());
    TestEnv {
        cluster,
        transport,
        shards,
        shard_state,
        driver,
    }
}

fn env(initial: ClusterState) -> TestEnv<TestOp> {
    build_env(
        TestOp::new(),
        ReplicationSettings::default(),
        initial,
        Arc::new(CallerThreadExecutor),
    )
}

fn shard_id() -> ShardId {
    ShardId::new("events", 0)
}

fn nodes(count: usize) -> DiscoveryNodes {
    let mut nodes = DiscoveryNodes::new(DiscoveryNode::new(LOCAL, LOCAL, "127.0.0.1:9300"))
        .with_master(LOCAL);
    for i in 1..count {
        let name = format!("node-{i}");
        nodes = nodes.with_node(DiscoveryNode::new(
            name.clone(),
            name,
            format!("127.0.0.1:{}", 9300 + i),
        ));
    }
    nodes
}

fn metadata(replicas: u32) -> Metadata {
    Metadata::new().with_index(IndexMetadata::new(
        "events",
        IndexSettings {
            number_of_shards: 1,
            number_of_replicas: replicas,
            shadow_replicas: false,
        },
    ))
}

fn state_with_copies(version: u64, node_count: usize, copies: Vec<ShardRouting>) -> ClusterState {
    let replicas = copies.len().saturating_sub(1) as u32;
    ClusterState::new(version, nodes(node_count))
        .with_metadata(metadata(replicas))
        .with_routing(RoutingTable::new().with_index(
            "events",
            IndexRoutingTable::new().with_shard(0, IndexShardRoutingTable::new(copies)),
        ))
}

/// 1 primary on the local node + `replicas` started replicas.
fn healthy_state(version: u64, replicas: usize) -> ClusterState {
    let mut copies = vec![ShardRouting::started(shard_id(), true, LOCAL)];
    for i in 1..=replicas {
        copies.push(ShardRouting::started(shard_id(), false, format!("node-{i}")));
    }
    state_with_copies(version, replicas + 1, copies)
}

type CapturedResults<R> = Arc<Mutex<Vec<Result<ReplicationResponse<R>>>>>;

fn capture<R: Send + 'static>() -> (ResponseHandler<ReplicationResponse<R>>, CapturedResults<R>) {
    let results: CapturedResults<R> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    let handler: ResponseHandler<ReplicationResponse<R>> = Box::new(move |result| {
        sink.lock().unwrap().push(result);
    });
    (handler, results)
}

fn request() -> ShardedRequest<TestDoc> {
    ShardedRequest::new("events", TestDoc)
}

// ============================================================================
// Happy path and fan-out accounting
// ============================================================================

#[test]
fn happy_path_one_primary_two_replicas_quorum() {
    let env = env(healthy_state(1, 2));
    let (listener, results) = capture();

    env.driver.execute(
        request().with_consistency(WriteConsistencyLevel::Quorum),
        listener,
    );

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1, "exactly one terminal reply");
    let response = results[0].as_ref().expect("operation succeeds");
    assert_eq!(response.reply, "indexed");
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 3);
    assert!(response.shards.failures.is_empty());

    assert_eq!(
        env.transport.replica_targets(),
        vec![NodeId::new("node-1"), NodeId::new("node-2")]
    );
    // Every shard reference taken during the operation was released.
    assert_eq!(
        env.shards.handle(&shard_id()).operations.load(Ordering::SeqCst),
        0
    );
}

#[test]
fn primary_only_completes_without_fanout() {
    let env = env(healthy_state(1, 0));
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 1);
    assert_eq!(response.shards.successful, 1);
    assert!(env.transport.replica_targets().is_empty());
}

#[test]
fn relocating_replica_is_applied_on_both_ends() {
    let copies = vec![
        ShardRouting::started(shard_id(), true, LOCAL),
        ShardRouting::relocating(shard_id(), false, "node-1", "node-2"),
    ];
    let env = env(state_with_copies(1, 3, copies));
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    // The moving copy counts as one pending target per end of the move.
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 3);
    assert_eq!(
        env.transport.replica_targets(),
        vec![NodeId::new("node-1"), NodeId::new("node-2")]
    );
}

#[test]
fn unassigned_replicas_are_counted_but_not_dispatched() {
    let copies = vec![
        ShardRouting::started(shard_id(), true, LOCAL),
        ShardRouting::started(shard_id(), false, "node-1"),
        ShardRouting::unassigned(shard_id(), false),
    ];
    let env = env(state_with_copies(1, 2, copies));
    let (listener, results) = capture();

    env.driver
        .execute(request().with_consistency(WriteConsistencyLevel::One), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 2);
    assert!(response.shards.failures.is_empty());
    assert_eq!(env.transport.replica_targets(), vec![NodeId::new("node-1")]);
}

#[test]
fn shadow_replicas_are_never_dispatched() {
    let copies = vec![
        ShardRouting::started(shard_id(), true, LOCAL),
        ShardRouting::started(shard_id(), false, "node-1"),
        ShardRouting::started(shard_id(), false, "node-2"),
    ];
    let state = ClusterState::new(1, nodes(3))
        .with_metadata(
            Metadata::new().with_index(IndexMetadata::new(
                "events",
                IndexSettings {
                    number_of_shards: 1,
                    number_of_replicas: 2,
                    shadow_replicas: true,
                },
            )),
        )
        .with_routing(RoutingTable::new().with_index(
            "events",
            IndexRoutingTable::new().with_shard(0, IndexShardRoutingTable::new(copies)),
        ));
    let env = env(state);
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 1);
    assert!(response.shards.failures.is_empty());
    assert!(env.transport.replica_targets().is_empty());
}

// ============================================================================
// Retry on cluster-state change
// ============================================================================

#[test]
fn inactive_primary_is_retried_until_started() {
    let initial = state_with_copies(
        1,
        3,
        vec![
            ShardRouting::initializing(shard_id(), true, LOCAL),
            ShardRouting::started(shard_id(), false, "node-1"),
            ShardRouting::started(shard_id(), false, "node-2"),
        ],
    );
    let env = env(initial);
    let (listener, results) = capture();

    env.driver.execute(request(), listener);
    assert!(results.lock().unwrap().is_empty(), "no reply while waiting");

    env.cluster.publish(healthy_state(2, 2));

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1, "exactly one reply after recovery");
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.successful, 3);
}

#[test]
fn consistency_shortfall_is_retried_as_unavailable() {
    // Quorum over 3 copies needs 2 active; only the primary is.
    let initial = state_with_copies(
        1,
        3,
        vec![
            ShardRouting::started(shard_id(), true, LOCAL),
            ShardRouting::initializing(shard_id(), false, "node-1"),
            ShardRouting::initializing(shard_id(), false, "node-2"),
        ],
    );
    let env = env(initial);
    let (listener, results) = capture();

    env.driver.execute(
        request().with_consistency(WriteConsistencyLevel::Quorum),
        listener,
    );
    assert!(results.lock().unwrap().is_empty());

    env.cluster.publish(healthy_state(2, 2));

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 3);
}

#[test]
fn retryable_block_waits_for_recovery() {
    let blocked = healthy_state(1, 1).with_blocks(ClusterBlocks::new().with_global(
        ClusterBlock::new(1, "state not recovered", true, vec![ClusterBlockLevel::Write]),
    ));
    let env = env(blocked);
    let (listener, results) = capture();

    env.driver.execute(request(), listener);
    assert!(results.lock().unwrap().is_empty());

    env.cluster.publish(healthy_state(2, 1));

    let results = results.lock().unwrap();
    assert!(results[0].is_ok());
}

#[test]
fn non_retryable_block_fails_immediately() {
    let blocked = healthy_state(1, 1).with_blocks(ClusterBlocks::new().with_global(
        ClusterBlock::new(9, "cluster read-only", false, vec![ClusterBlockLevel::Write]),
    ));
    let env = env(blocked);
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    assert!(matches!(
        results[0],
        Err(ReplicationError::ClusterBlocked { retryable: false, .. })
    ));
}

#[test]
fn timeout_gets_one_final_attempt_then_fails() {
    // Metadata knows the index but routing never shows it.
    let state = ClusterState::new(1, nodes(1)).with_metadata(metadata(0));
    let env = env(state);
    let (listener, results) = capture();

    env.driver
        .execute(request().with_timeout(Duration::ZERO), listener);

    // Expired deadline: wait fires TimedOut inline, the phase runs its one
    // final attempt, and the next retry is terminal.
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    match &results[0] {
        Err(ReplicationError::UnavailableShards { shard, .. }) => {
            assert_eq!(shard, &shard_id());
        }
        other => panic!("expected UnavailableShards, got {other:?}"),
    }
}

#[test]
fn service_close_fails_pending_retry() {
    let initial = state_with_copies(
        1,
        1,
        vec![ShardRouting::initializing(shard_id(), true, LOCAL)],
    );
    let env = env(initial);
    let (listener, results) = capture();

    env.driver.execute(request(), listener);
    env.cluster.close();

    let results = results.lock().unwrap();
    assert!(matches!(results[0], Err(ReplicationError::NodeClosed { .. })));
}

// ============================================================================
// Replica failure accounting
// ============================================================================

#[test]
fn version_conflict_on_replica_is_ignored() {
    let env = env(healthy_state(1, 2));
    env.transport.script_replica(
        "node-1",
        ReplicaBehavior::Fail(ReplicationError::VersionConflict {
            shard: shard_id(),
            reason: "replica already at a newer version".to_string(),
        }),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 2);
    assert!(response.shards.failures.is_empty());
    assert!(
        env.shard_state.calls.lock().unwrap().is_empty(),
        "ignorable failures are not reported to the master"
    );
}

#[test]
fn reportable_replica_failure_is_recorded_and_reported() {
    let settings = ReplicationSettings {
        shard_failure_timeout_ms: Some(30_000),
        ..ReplicationSettings::default()
    };
    let env = build_env(
        TestOp::new(),
        settings,
        healthy_state(1, 2),
        Arc::new(CallerThreadExecutor),
    );
    env.transport.script_replica(
        "node-1",
        ReplicaBehavior::Fail(ReplicationError::EngineFailure {
            shard: shard_id(),
            reason: "translog append failed".to_string(),
        }),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 2);
    assert_eq!(response.shards.failures.len(), 1);

    let failure = &response.shards.failures[0];
    assert_eq!(failure.index, "events");
    assert_eq!(failure.shard, 0);
    assert_eq!(failure.node, Some(NodeId::new("node-1")));
    assert_eq!(failure.status, RestStatus::InternalServerError);
    assert!(!failure.primary);

    let calls = env.shard_state.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (routing, timeout) = &calls[0];
    assert_eq!(routing.current_node, Some(NodeId::new("node-1")));
    assert_eq!(*timeout, Some(Duration::from_secs(30)));
}

#[test]
fn master_report_failure_still_completes_the_write() {
    let env = env(healthy_state(1, 2));
    *env.shard_state.outcome.lock().unwrap() = MasterOutcome::ReportTimeout;
    env.transport.script_replica(
        "node-2",
        ReplicaBehavior::Fail(ReplicationError::EngineFailure {
            shard: shard_id(),
            reason: "broken".to_string(),
        }),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    // Receive timeout on the report changes nothing about the accounting.
    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.successful, 2);
    assert_eq!(response.shards.failures.len(), 1);
    assert_eq!(env.shard_state.calls.lock().unwrap().len(), 1);
}

#[test]
fn no_master_report_still_completes_the_write() {
    let env = env(healthy_state(1, 2));
    *env.shard_state.outcome.lock().unwrap() = MasterOutcome::NoMaster;
    env.transport.script_replica(
        "node-1",
        ReplicaBehavior::Fail(ReplicationError::EngineFailure {
            shard: shard_id(),
            reason: "broken".to_string(),
        }),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    assert_eq!(results[0].as_ref().unwrap().shards.successful, 2);
}

#[test]
fn vanished_target_node_becomes_a_causeless_failure() {
    // The routing table still lists node-9, but the node set does not.
    let copies = vec![
        ShardRouting::started(shard_id(), true, LOCAL),
        ShardRouting::started(shard_id(), false, "node-1"),
        ShardRouting::started(shard_id(), false, "node-9"),
    ];
    let env = env(state_with_copies(1, 2, copies));
    let (listener, results) = capture();

    env.driver
        .execute(request().with_consistency(WriteConsistencyLevel::One), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 3);
    assert_eq!(response.shards.successful, 2);
    assert_eq!(response.shards.failures.len(), 1);

    let failure = &response.shards.failures[0];
    assert_eq!(failure.node, Some(NodeId::new("node-9")));
    assert!(failure.cause.is_none());
    assert_eq!(failure.status, RestStatus::ServiceUnavailable);
    assert!(
        env.shard_state.calls.lock().unwrap().is_empty(),
        "no report when there is no node left to fail"
    );
    assert_eq!(env.transport.replica_targets(), vec![NodeId::new("node-1")]);
}

// ============================================================================
// Primary failures
// ============================================================================

#[test]
fn primary_failure_fails_the_operation() {
    let op = TestOp::failing_first(vec![ReplicationError::EngineFailure {
        shard: shard_id(),
        reason: "disk full".to_string(),
    }]);
    let env = build_env(
        op,
        ReplicationSettings::default(),
        healthy_state(1, 2),
        Arc::new(CallerThreadExecutor),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    assert!(matches!(
        results[0],
        Err(ReplicationError::EngineFailure { .. })
    ));
    assert!(env.transport.replica_targets().is_empty());
    assert_eq!(
        env.shards.handle(&shard_id()).operations.load(Ordering::SeqCst),
        0,
        "guard released on the failure path"
    );
}

#[test]
fn retry_on_primary_reroutes_and_succeeds() {
    let op = TestOp::failing_first(vec![ReplicationError::RetryOnPrimary {
        shard: shard_id(),
        reason: "mappings not yet visible".to_string(),
    }]);
    let env = build_env(
        op,
        ReplicationSettings::default(),
        healthy_state(1, 2),
        Arc::new(CallerThreadExecutor),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);
    assert!(results.lock().unwrap().is_empty(), "parked for the next state");

    env.cluster.publish(healthy_state(2, 2));

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1, "exactly one success reply");
    assert_eq!(results[0].as_ref().unwrap().shards.successful, 3);
}

#[test]
fn rejected_primary_task_is_terminal() {
    let env = build_env(
        TestOp::new(),
        ReplicationSettings::default(),
        healthy_state(1, 1),
        Arc::new(RejectingExecutor),
    );
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    assert!(matches!(results[0], Err(ReplicationError::Rejected { .. })));
}

// ============================================================================
// Alias resolution
// ============================================================================

#[test]
fn alias_resolves_to_concrete_index() {
    let concrete = ShardId::new("events-000002", 0);
    let state = ClusterState::new(1, nodes(1))
        .with_metadata(Metadata::new().with_index(
            IndexMetadata::new(
                "events-000002",
                IndexSettings {
                    number_of_shards: 1,
                    number_of_replicas: 0,
                    shadow_replicas: false,
                },
            )
            .with_alias("events"),
        ))
        .with_routing(RoutingTable::new().with_index(
            "events-000002",
            IndexRoutingTable::new().with_shard(
                0,
                IndexShardRoutingTable::new(vec![ShardRouting::started(
                    concrete.clone(),
                    true,
                    LOCAL,
                )]),
            ),
        ));
    let env = env(state);
    let (listener, results) = capture();

    env.driver.execute(request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.total, 1);
    assert_eq!(response.shards.successful, 1);
    assert_eq!(
        env.shards.handle(&concrete).operations.load(Ordering::SeqCst),
        0
    );
}

// ============================================================================
// Replica-side handler
// ============================================================================

#[test]
fn replica_handler_acks_empty_on_success() {
    let env = env(healthy_state(1, 1));
    let replies: Arc<Mutex<Vec<Result<()>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);

    env.driver.handle_replica(
        ReplicaRequest::new(shard_id(), TestDoc),
        Arc::new(HandlerChannel::new(Box::new(move |result| {
            sink.lock().unwrap().push(result);
        }))),
    );

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].is_ok());
    assert_eq!(
        env.shards.handle(&shard_id()).operations.load(Ordering::SeqCst),
        0
    );
}

#[test]
fn replica_handler_fails_shard_on_real_error_and_replies_it() {
    let op = TestOp::failing_replica(vec![ReplicationError::EngineFailure {
        shard: shard_id(),
        reason: "checksum mismatch".to_string(),
    }]);
    let env = build_env(
        op,
        ReplicationSettings::default(),
        healthy_state(1, 0),
        Arc::new(CallerThreadExecutor),
    );
    let replies: Arc<Mutex<Vec<Result<()>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);

    env.driver.handle_replica(
        ReplicaRequest::new(shard_id(), TestDoc),
        Arc::new(HandlerChannel::new(Box::new(move |result| {
            sink.lock().unwrap().push(result);
        }))),
    );

    let replies = replies.lock().unwrap();
    assert!(matches!(
        replies[0],
        Err(ReplicationError::EngineFailure { .. })
    ));
    // The local copy asked to fail itself.
    assert_eq!(
        env.shards.handle(&shard_id()).failed.lock().unwrap().as_deref(),
        Some("replica write failed")
    );
}

#[test]
fn replica_handler_does_not_fail_shard_on_conflict() {
    let op = TestOp::failing_replica(vec![ReplicationError::VersionConflict {
        shard: shard_id(),
        reason: "already applied".to_string(),
    }]);
    let env = build_env(
        op,
        ReplicationSettings::default(),
        healthy_state(1, 0),
        Arc::new(CallerThreadExecutor),
    );
    let replies: Arc<Mutex<Vec<Result<()>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);

    env.driver.handle_replica(
        ReplicaRequest::new(shard_id(), TestDoc),
        Arc::new(HandlerChannel::new(Box::new(move |result| {
            sink.lock().unwrap().push(result);
        }))),
    );

    // The error still goes back to the coordinator (which will classify it
    // as ignorable), but the local copy stays in service.
    let replies = replies.lock().unwrap();
    assert!(matches!(
        replies[0],
        Err(ReplicationError::VersionConflict { .. })
    ));
    assert!(env.shards.handle(&shard_id()).failed.lock().unwrap().is_none());
}

// ============================================================================
// Document write (mapping side channel, version stamping)
// ============================================================================

struct ScriptedEngine {
    /// Whether each successive prepare reports a dynamic mapping update.
    prepare_updates: Mutex<VecDeque<bool>>,
    applies: Mutex<Vec<EngineWrite>>,
    synced: Mutex<Vec<TranslogLocation>>,
    durability: TranslogDurability,
}

impl ScriptedEngine {
    fn new(prepare_updates: Vec<bool>, durability: TranslogDurability) -> Self {
        Self {
            prepare_updates: Mutex::new(prepare_updates.into()),
            applies: Mutex::new(Vec::new()),
            synced: Mutex::new(Vec::new()),
            durability,
        }
    }
}

impl ShardEngine for ScriptedEngine {
    fn prepare(&self, write: EngineWrite) -> Result<PreparedWrite> {
        let update = self
            .prepare_updates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false);
        Ok(PreparedWrite {
            write,
            mapping_update: update.then(|| serde_json::json!({"properties": {"f": {}}})),
        })
    }

    fn apply(&self, write: &EngineWrite) -> Result<AppliedWrite> {
        let version = if write.version_type == VersionType::Force {
            write.version
        } else {
            Version::new(1)
        };
        let mut applies = self.applies.lock().unwrap();
        applies.push(write.clone());
        Ok(AppliedWrite {
            created: true,
            version,
            location: TranslogLocation {
                generation: 1,
                offset: applies.len() as u64,
            },
        })
    }

    fn durability(&self) -> TranslogDurability {
        self.durability
    }

    fn sync_translog(&self, location: &TranslogLocation) -> Result<()> {
        self.synced.lock().unwrap().push(*location);
        Ok(())
    }

    fn refresh(&self, _source: &str) {}

    fn maybe_flush(&self) {}
}

struct SingleEngineStore {
    engine: Arc<ScriptedEngine>,
}

impl EngineStore for SingleEngineStore {
    fn engine(&self, _shard_id: &ShardId) -> Result<Arc<dyn ShardEngine>> {
        Ok(Arc::clone(&self.engine) as Arc<dyn ShardEngine>)
    }
}

struct ScriptedMapping {
    calls: Mutex<Vec<(String, MappingUpdate)>>,
}

impl MappingService for ScriptedMapping {
    fn update_mapping_on_master(&self, index: &str, update: &MappingUpdate) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((index.to_string(), update.clone()));
        Ok(())
    }
}

struct IndexEnv {
    env: TestEnv<IndexOperation>,
    engine: Arc<ScriptedEngine>,
    mapping: Arc<ScriptedMapping>,
}

fn index_env(initial: ClusterState, prepare_updates: Vec<bool>) -> IndexEnv {
    let engine = Arc::new(ScriptedEngine::new(
        prepare_updates,
        TranslogDurability::Request,
    ));
    let mapping = Arc::new(ScriptedMapping {
        calls: Mutex::new(Vec::new()),
    });
    let operation = IndexOperation::new(
        Arc::new(SingleEngineStore {
            engine: Arc::clone(&engine),
        }),
        Arc::clone(&mapping) as Arc<dyn MappingService>,
    );
    let env = build_env(
        operation,
        ReplicationSettings::default(),
        initial,
        Arc::new(CallerThreadExecutor),
    );
    IndexEnv {
        env,
        engine,
        mapping,
    }
}

fn document_request() -> ShardedRequest<DocumentWrite> {
    ShardedRequest::new("events", DocumentWrite::new(r#"{"f": 1}"#))
}

#[test]
fn document_write_stamps_version_for_replicas() {
    let harness = index_env(healthy_state(1, 1), vec![false, false]);
    let (listener, results) = capture();

    harness.env.driver.execute(document_request(), listener);

    let results = results.lock().unwrap();
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.reply.version, Version::new(1));
    assert!(response.reply.created);
    assert_eq!(response.shards.successful, 2);

    // The replica saw the concrete version and the replication flavor.
    let sends = harness.env.transport.replica_sends.lock().unwrap();
    assert_eq!(sends.len(), 1);
    let replica_op = sends[0].1.payload();
    assert_eq!(replica_op.version, Version::new(1));
    assert_eq!(replica_op.version_type, VersionType::Force);
    assert_eq!(replica_op.id.as_deref(), Some(response.reply.id.as_str()));

    // Request-durability: the primary synced the translog before replying.
    // (Replica acks are canned in this harness; the replica-side engine
    // path is covered separately below.)
    assert_eq!(harness.engine.synced.lock().unwrap().len(), 1);
    assert!(harness.mapping.calls.lock().unwrap().is_empty());
}

#[test]
fn single_mapping_update_syncs_master_and_proceeds() {
    // First prepare emits an update, the re-prepare after the master sync
    // is clean.
    let harness = index_env(healthy_state(1, 1), vec![true, false, false]);
    let (listener, results) = capture();

    harness.env.driver.execute(document_request(), listener);

    let results = results.lock().unwrap();
    assert!(results[0].is_ok());
    let calls = harness.mapping.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "events");
}

#[test]
fn repeated_mapping_update_retries_the_whole_operation() {
    // Both prepares of the first attempt emit updates: the op raises the
    // primary retry marker and the request is re-routed on the next state.
    // The second attempt parses clean and succeeds.
    let harness = index_env(healthy_state(1, 1), vec![true, true, false, false]);
    let (listener, results) = capture();

    harness.env.driver.execute(document_request(), listener);
    assert!(results.lock().unwrap().is_empty(), "parked after retry marker");
    assert_eq!(harness.mapping.calls.lock().unwrap().len(), 1);

    harness.env.cluster.publish(healthy_state(2, 1));

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1, "exactly one client reply");
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.shards.successful, 2);
    // Nothing was applied on the first attempt; the second applied once on
    // the primary.
    let applies = harness.engine.applies.lock().unwrap();
    assert_eq!(applies.len(), 1);
}

#[test]
fn replica_unknown_mapping_waits_for_state_then_applies() {
    // Replica-side prepare sees an unknown mapping once, then succeeds
    // after the next cluster state arrives.
    let harness = index_env(healthy_state(1, 0), vec![true, false]);
    let replies: Arc<Mutex<Vec<Result<()>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);

    let op = DocumentWrite::new(r#"{"f": 1}"#)
        .with_id("doc-1")
        .with_version(Version::new(3), VersionType::Force);
    harness.env.driver.handle_replica(
        ReplicaRequest::new(shard_id(), op),
        Arc::new(HandlerChannel::new(Box::new(move |result| {
            sink.lock().unwrap().push(result);
        }))),
    );
    assert!(replies.lock().unwrap().is_empty(), "waiting for mapping");

    harness.env.cluster.publish(healthy_state(2, 0));

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].is_ok());
    // The forced version was applied as stamped by the primary.
    let applies = harness.engine.applies.lock().unwrap();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].version, Version::new(3));
}

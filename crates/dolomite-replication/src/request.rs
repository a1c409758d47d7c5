//! Request envelopes for replicated operations.

use std::time::Duration;

use dolomite_types::ShardId;
use serde::{Deserialize, Serialize};

use crate::consistency::WriteConsistencyLevel;

/// Default bound on how long the reroute phase may keep retrying.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// ShardedRequest
// ============================================================================

/// A client request addressed at one shard of one index.
///
/// `index` may be an alias; the reroute phase resolves it. The concrete
/// shard id starts out unset and is stamped exactly once after resolution;
/// from then on it is immutable and authoritative for every downstream
/// phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardedRequest<P> {
    index: String,
    shard_id: Option<ShardId>,
    timeout: Duration,
    consistency: WriteConsistencyLevel,
    payload: P,
}

impl<P> ShardedRequest<P> {
    pub fn new(index: impl Into<String>, payload: P) -> Self {
        Self {
            index: index.into(),
            shard_id: None,
            timeout: DEFAULT_TIMEOUT,
            consistency: WriteConsistencyLevel::Default,
            payload,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_consistency(mut self, consistency: WriteConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    /// The index name or alias the caller addressed.
    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn consistency(&self) -> WriteConsistencyLevel {
        self.consistency
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn shard_id(&self) -> Option<&ShardId> {
        self.shard_id.as_ref()
    }

    /// Stamps the resolved shard id. Resolution happens exactly once; a
    /// second stamp is a programming error.
    pub fn set_shard_id(&mut self, shard_id: ShardId) {
        debug_assert!(
            self.shard_id.is_none(),
            "shard id is resolved exactly once, already {:?}",
            self.shard_id
        );
        self.shard_id = Some(shard_id);
    }
}

// ============================================================================
// InternalRequest
// ============================================================================

/// A request paired with the concrete index it resolved to.
///
/// Built by the reroute phase once alias resolution is done and passed
/// between phases from there; the concrete index never changes within one
/// attempt.
#[derive(Debug, Clone)]
pub struct InternalRequest<P> {
    request: ShardedRequest<P>,
    concrete_index: String,
}

impl<P> InternalRequest<P> {
    pub fn new(request: ShardedRequest<P>, concrete_index: impl Into<String>) -> Self {
        Self {
            request,
            concrete_index: concrete_index.into(),
        }
    }

    pub fn request(&self) -> &ShardedRequest<P> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut ShardedRequest<P> {
        &mut self.request
    }

    pub fn concrete_index(&self) -> &str {
        &self.concrete_index
    }

    pub fn into_request(self) -> ShardedRequest<P> {
        self.request
    }
}

// ============================================================================
// ReplicaRequest
// ============================================================================

/// The request applied on replica copies, derived from the primary's result.
///
/// The shard id here is authoritative: a replica applies the operation to
/// exactly this shard and never re-resolves routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaRequest<P> {
    shard_id: ShardId,
    payload: P,
}

impl<P> ReplicaRequest<P> {
    pub fn new(shard_id: ShardId, payload: P) -> Self {
        Self { shard_id, payload }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

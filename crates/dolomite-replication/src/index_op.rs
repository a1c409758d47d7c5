//! The document indexing operation.
//!
//! The primary flow mirrors what the engine needs for deterministic
//! replicas: prepare (which may surface a dynamic mapping update), push the
//! update to the master and re-prepare if so, apply, then stamp the
//! resolved version onto the replica op and switch its version type to the
//! replication flavor. Replicas re-prepare with that stamped version and
//! must never see an unknown mapping; if they do, the apply is retried
//! after the next cluster-state change rather than failing the copy.

use std::sync::Arc;

use bytes::Bytes;
use dolomite_cluster::ClusterState;
use dolomite_types::{ShardId, Version, VersionType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{
    EngineStore, EngineWrite, MappingService, ShardEngine, TranslogDurability, TranslogLocation,
    WriteOrigin,
};
use crate::error::{ReplicationError, Result};
use crate::operation::{PrimaryResult, ReplicatedOperation};
use crate::request::InternalRequest;

// ============================================================================
// Payloads
// ============================================================================

/// A single-document write as carried by requests and replica ops.
///
/// On the replica side `version` is the concrete version the primary
/// resolved and `version_type` is the replication flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentWrite {
    pub id: Option<String>,
    pub routing: Option<String>,
    pub source: Bytes,
    pub version: Version,
    pub version_type: VersionType,
    pub refresh: bool,
}

impl DocumentWrite {
    pub fn new(source: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            routing: None,
            source: source.into(),
            version: Version::MATCH_ANY,
            version_type: VersionType::Internal,
            refresh: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_version(mut self, version: Version, version_type: VersionType) -> Self {
        self.version = version;
        self.version_type = version_type;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Reply for a document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReply {
    pub id: String,
    pub version: Version,
    pub created: bool,
}

// ============================================================================
// IndexOperation
// ============================================================================

/// The indexing action.
pub struct IndexOperation {
    engines: Arc<dyn EngineStore>,
    mapping: Arc<dyn MappingService>,
}

impl IndexOperation {
    pub fn new(engines: Arc<dyn EngineStore>, mapping: Arc<dyn MappingService>) -> Self {
        Self { engines, mapping }
    }

    fn engine_write(doc: &DocumentWrite, id: String, origin: WriteOrigin) -> EngineWrite {
        EngineWrite {
            id,
            routing: doc.routing.clone(),
            source: doc.source.clone(),
            version: doc.version,
            version_type: doc.version_type,
            origin,
        }
    }
}

impl ReplicatedOperation for IndexOperation {
    type Request = DocumentWrite;
    type ReplicaOp = DocumentWrite;
    type Reply = DocumentReply;

    const NAME: &'static str = "indices:data/write/index";

    fn resolve_request(
        &self,
        _state: &ClusterState,
        request: &mut InternalRequest<Self::Request>,
    ) -> Result<()> {
        // Ids are generated on the coordinating node so retries reuse them.
        let doc = request.request_mut().payload_mut();
        if doc.id.is_none() {
            doc.id = Some(Uuid::new_v4().simple().to_string());
        }
        Ok(())
    }

    fn target_shard(
        &self,
        state: &ClusterState,
        request: &InternalRequest<Self::Request>,
    ) -> Result<ShardId> {
        let index = state
            .metadata
            .index(request.concrete_index())
            .ok_or_else(|| ReplicationError::IndexNotFound {
                index: request.concrete_index().to_string(),
            })?;
        let doc = request.request().payload();
        let key = doc
            .routing
            .as_deref()
            .or(doc.id.as_deref())
            .ok_or_else(|| ReplicationError::Internal {
                reason: "document id not resolved before shard targeting".to_string(),
            })?;
        let shard = route_shard(key, index.settings.number_of_shards);
        Ok(ShardId::new(request.concrete_index(), shard))
    }

    fn execute_on_primary(
        &self,
        request: &InternalRequest<Self::Request>,
    ) -> Result<PrimaryResult<Self::Reply, Self::ReplicaOp>> {
        let doc = request.request().payload();
        let shard_id = request
            .request()
            .shard_id()
            .cloned()
            .ok_or_else(|| ReplicationError::Internal {
                reason: "primary op without a shard id".to_string(),
            })?;
        let id = doc.id.clone().ok_or_else(|| ReplicationError::Internal {
            reason: "primary op without a document id".to_string(),
        })?;
        let engine = self.engines.engine(&shard_id)?;

        let mut prepared =
            engine.prepare(Self::engine_write(doc, id.clone(), WriteOrigin::Primary))?;
        if let Some(update) = prepared.mapping_update.take() {
            // Dynamic mapping: push to the master, then parse again with
            // the updated mapping.
            self.mapping
                .update_mapping_on_master(request.concrete_index(), &update)?;
            prepared = engine.prepare(Self::engine_write(doc, id.clone(), WriteOrigin::Primary))?;
            if prepared.mapping_update.is_some() {
                return Err(ReplicationError::RetryOnPrimary {
                    shard: shard_id,
                    reason: "dynamic mappings are not yet available on the primary".to_string(),
                });
            }
        }

        let applied = engine.apply(&prepared.write)?;
        debug_assert!(
            applied.version.is_valid_for_writes(),
            "engine resolved an unwritable version {:?}",
            applied.version
        );
        post_write(engine.as_ref(), &applied.location, doc.refresh)?;

        // Replicas get the resolved version and the replication flavor of
        // the version type, so they reproduce this outcome exactly.
        let replica_op = DocumentWrite {
            id: Some(id.clone()),
            routing: doc.routing.clone(),
            source: doc.source.clone(),
            version: applied.version,
            version_type: doc.version_type.for_replication(),
            refresh: doc.refresh,
        };
        Ok(PrimaryResult {
            reply: DocumentReply {
                id,
                version: applied.version,
                created: applied.created,
            },
            replica_op,
        })
    }

    fn execute_on_replica(&self, shard_id: &ShardId, op: &Self::ReplicaOp) -> Result<()> {
        let id = op.id.clone().ok_or_else(|| ReplicationError::Internal {
            reason: "replica op without a document id".to_string(),
        })?;
        let engine = self.engines.engine(shard_id)?;
        let prepared = engine.prepare(Self::engine_write(op, id, WriteOrigin::Replica))?;
        if prepared.mapping_update.is_some() {
            // The mapping the primary used has not reached this node yet.
            return Err(ReplicationError::RetryOnReplica {
                shard: shard_id.clone(),
                reason: "mapping update not yet applied on this node".to_string(),
            });
        }
        let applied = engine.apply(&prepared.write)?;
        post_write(engine.as_ref(), &applied.location, op.refresh)?;
        Ok(())
    }
}

/// Deterministic routing-key → shard-number hash. Every node must agree, so
/// this uses a keyed-nothing content hash rather than any per-process
/// seeded hasher.
fn route_shard(key: &str, shards: u32) -> u32 {
    let digest = blake3::hash(key.as_bytes());
    let bytes: [u8; 8] = digest.as_bytes()[..8]
        .try_into()
        .expect("blake3 digest is 32 bytes");
    (u64::from_le_bytes(bytes) % u64::from(shards.max(1))) as u32
}

fn post_write(engine: &dyn ShardEngine, location: &TranslogLocation, refresh: bool) -> Result<()> {
    if refresh {
        engine.refresh("refresh_flag_index");
    }
    if engine.durability() == TranslogDurability::Request {
        engine.sync_translog(location)?;
    }
    engine.maybe_flush();
    Ok(())
}

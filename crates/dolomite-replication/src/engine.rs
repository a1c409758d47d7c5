//! Shard-local engine seams for document writes.
//!
//! The engine is where a write actually lands: parse, version resolution,
//! the translog append. This module only defines the surface the write
//! operation drives; storage itself is out of scope here.

use std::sync::Arc;

use bytes::Bytes;
use dolomite_types::{ShardId, Version, VersionType};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A dynamic mapping update emitted while parsing a document.
pub type MappingUpdate = serde_json::Value;

/// Synchronous mapping propagation to the master.
///
/// Called from the primary's executor; blocks until the master applied the
/// update (or refuses it). The write is re-prepared afterwards so the
/// updated mapping is actually used.
pub trait MappingService: Send + Sync {
    fn update_mapping_on_master(&self, index: &str, update: &MappingUpdate) -> Result<()>;
}

/// When the translog must be fsynced relative to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslogDurability {
    /// Sync before acknowledging each request.
    Request,
    /// Sync on an interval; requests do not wait.
    Async,
}

/// Position of an operation in the shard's translog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslogLocation {
    pub generation: u64,
    pub offset: u64,
}

/// Which role is applying the write. Replicas apply with the version the
/// primary stamped and skip conflict checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    Primary,
    Replica,
}

/// A fully specified single-document write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineWrite {
    pub id: String,
    pub routing: Option<String>,
    pub source: Bytes,
    pub version: Version,
    pub version_type: VersionType,
    pub origin: WriteOrigin,
}

/// A parsed write, ready to apply. If parsing discovered fields the mapping
/// does not know yet, `mapping_update` carries the dynamic update that must
/// reach the master before the write can proceed.
#[derive(Debug, Clone)]
pub struct PreparedWrite {
    pub write: EngineWrite,
    pub mapping_update: Option<MappingUpdate>,
}

/// Outcome of an applied write.
#[derive(Debug, Clone, Copy)]
pub struct AppliedWrite {
    /// True if the document did not exist before.
    pub created: bool,
    /// The version the engine resolved and stamped.
    pub version: Version,
    pub location: TranslogLocation,
}

/// The engine of one local shard copy.
pub trait ShardEngine: Send + Sync {
    /// Parses the document and resolves the mapping, without applying.
    fn prepare(&self, write: EngineWrite) -> Result<PreparedWrite>;

    /// Applies a prepared write.
    fn apply(&self, write: &EngineWrite) -> Result<AppliedWrite>;

    fn durability(&self) -> TranslogDurability;

    fn sync_translog(&self, location: &TranslogLocation) -> Result<()>;

    fn refresh(&self, source: &str);

    /// Flush if the translog has grown past its threshold.
    fn maybe_flush(&self);
}

/// Node-local lookup from shard id to its engine.
pub trait EngineStore: Send + Sync {
    fn engine(&self, shard_id: &ShardId) -> Result<Arc<dyn ShardEngine>>;
}

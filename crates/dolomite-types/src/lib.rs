//! # dolomite-types: Core types for `Dolomite`
//!
//! This crate contains shared types used across the `Dolomite` system:
//! - Cluster identity ([`NodeId`], [`IndexUuid`])
//! - Shard addressing ([`ShardId`])
//! - Document versioning ([`Version`], [`VersionType`])
//! - REST-level status codes ([`RestStatus`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// NodeId
// ============================================================================

/// Unique identifier of a node in the cluster.
///
/// Node ids are assigned when a node joins and are stable for the lifetime
/// of that process. They are compared often (routing decisions, failure
/// accounting) and printed in diagnostics, so the wrapper keeps the string
/// private and exposes only what callers need.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// ShardId
// ============================================================================

/// Address of one shard of one index.
///
/// A shard id is the pair of the concrete index name and the shard number
/// within that index. It is the routing key for every operation in the
/// write path: once a request has been resolved to a `ShardId`, that id is
/// authoritative and is never re-derived downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    index: String,
    number: u32,
}

impl ShardId {
    pub fn new(index: impl Into<String>, number: u32) -> Self {
        Self {
            index: index.into(),
            number,
        }
    }

    /// The concrete index this shard belongs to.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// The shard number within the index.
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.number)
    }
}

// ============================================================================
// IndexUuid
// ============================================================================

/// Unique identifier of one incarnation of an index.
///
/// Index names can be deleted and re-created; the uuid distinguishes the
/// incarnations so that a stale failure report cannot be applied to a new
/// index that happens to reuse the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexUuid(Uuid);

impl IndexUuid {
    /// Creates a fresh random uuid for a newly created index.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for IndexUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Version / VersionType
// ============================================================================

/// Version number stamped on a document by the primary.
///
/// `MATCH_ANY` is the sentinel carried by requests that do not care which
/// version they overwrite; the primary replaces it with the concrete
/// version it assigned, so replicas always see a resolved version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(i64);

impl Version {
    /// Sentinel: the writer accepts whatever version is current.
    pub const MATCH_ANY: Version = Version(-3);

    pub fn new(version: i64) -> Self {
        Self(version)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true if this is a concrete version a write may carry to
    /// replicas (positive, not a sentinel).
    ///
    /// # Examples
    ///
    /// ```
    /// # use dolomite_types::Version;
    /// assert!(Version::new(1).is_valid_for_writes());
    /// assert!(!Version::MATCH_ANY.is_valid_for_writes());
    /// ```
    pub fn is_valid_for_writes(&self) -> bool {
        self.0 >= 1
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a version carried by a write request is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    /// The engine assigns the next internal version; a concrete requested
    /// version is checked against the current one.
    #[default]
    Internal,
    /// The caller supplies the version; the write succeeds only if it is
    /// higher than the current one.
    External,
    /// The version is applied as-is without checking. Used on replicas so
    /// they deterministically reproduce the primary's outcome.
    Force,
}

impl VersionType {
    /// The flavor replicas (and recovery) use for this type.
    ///
    /// Internal versioning becomes `Force` because the primary has already
    /// resolved the concrete version; the other flavors are deterministic
    /// as they stand.
    pub fn for_replication(self) -> Self {
        match self {
            VersionType::Internal => VersionType::Force,
            other => other,
        }
    }
}

// ============================================================================
// RestStatus
// ============================================================================

/// Subset of REST status codes surfaced by the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestStatus {
    Ok,
    Created,
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    GatewayTimeout,
}

impl RestStatus {
    /// Returns the numeric HTTP status code.
    pub fn as_u16(self) -> u16 {
        match self {
            RestStatus::Ok => 200,
            RestStatus::Created => 201,
            RestStatus::BadRequest => 400,
            RestStatus::Forbidden => 403,
            RestStatus::NotFound => 404,
            RestStatus::Conflict => 409,
            RestStatus::TooManyRequests => 429,
            RestStatus::InternalServerError => 500,
            RestStatus::ServiceUnavailable => 503,
            RestStatus::GatewayTimeout => 504,
        }
    }
}

impl Display for RestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

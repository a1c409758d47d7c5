//! Replication settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consistency::WriteConsistencyLevel;
use crate::error::{ReplicationError, Result};

/// Node-level knobs of the write path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    /// Default consistency applied when a request carries
    /// [`WriteConsistencyLevel::Default`].
    pub write_consistency: WriteConsistencyLevel,

    /// How long to wait for the master to acknowledge a shard-failed
    /// report. `None` waits indefinitely.
    pub shard_failure_timeout_ms: Option<u64>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            write_consistency: WriteConsistencyLevel::Quorum,
            shard_failure_timeout_ms: None,
        }
    }
}

impl ReplicationSettings {
    /// Parses settings from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|error| ReplicationError::InvalidSettings {
            reason: error.to_string(),
        })
    }

    pub fn shard_failure_timeout(&self) -> Option<Duration> {
        self.shard_failure_timeout_ms.map(Duration::from_millis)
    }

    /// Resolves a request's consistency level against the configured
    /// default.
    pub fn resolve_consistency(&self, requested: WriteConsistencyLevel) -> WriteConsistencyLevel {
        match requested {
            WriteConsistencyLevel::Default => self.write_consistency,
            other => other,
        }
    }
}

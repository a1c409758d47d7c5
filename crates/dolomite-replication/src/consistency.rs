//! Write-consistency admission control.
//!
//! Before the primary executes a write, the routing table must show enough
//! active copies for the level the caller asked for. The check is advisory:
//! it reads the observed (possibly stale) state, so passing it does not
//! guarantee the replicas will still be there at fan-out time. Failing it
//! is retryable, since copies may come back with the next cluster state.

use std::fmt;

use dolomite_cluster::IndexShardRoutingTable;
use serde::{Deserialize, Serialize};

/// How many active shard copies a write wants before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteConsistencyLevel {
    /// Use the node-level configured default.
    #[default]
    Default,
    One,
    Quorum,
    All,
}

impl fmt::Display for WriteConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteConsistencyLevel::Default => "default",
            WriteConsistencyLevel::One => "one",
            WriteConsistencyLevel::Quorum => "quorum",
            WriteConsistencyLevel::All => "all",
        };
        write!(f, "{name}")
    }
}

/// Number of active copies required for `level` over `copies` total copies.
///
/// Quorum only demands a majority when there are enough copies for a
/// majority to mean something: with one or two copies a "quorum" of a
/// single-replica pair would make every node outage block writes, so it
/// degrades to one.
pub fn required_active_copies(level: WriteConsistencyLevel, copies: usize) -> usize {
    debug_assert!(
        level != WriteConsistencyLevel::Default,
        "default level must be resolved against settings before admission"
    );
    match level {
        WriteConsistencyLevel::All => copies,
        WriteConsistencyLevel::Quorum if copies > 2 => copies / 2 + 1,
        _ => 1,
    }
}

/// Admission failure: not enough active copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyFailure {
    pub level: WriteConsistencyLevel,
    pub required: usize,
    pub active: usize,
}

impl fmt::Display for ConsistencyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "not enough active shard copies to meet write consistency of [{}] (have {}, needed {})",
            self.level, self.active, self.required
        )
    }
}

/// Checks the admission rule against one shard's routing table.
pub fn check_write_consistency(
    table: &IndexShardRoutingTable,
    level: WriteConsistencyLevel,
) -> Result<(), ConsistencyFailure> {
    let required = required_active_copies(level, table.size());
    let active = table.active_count();
    if active < required {
        return Err(ConsistencyFailure {
            level,
            required,
            active,
        });
    }
    Ok(())
}

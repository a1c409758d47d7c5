//! Cluster blocks: operations forbidden by the current cluster state.
//!
//! A block either protects a state the cluster will leave on its own (for
//! example, the state not yet being recovered after startup) or one that
//! needs operator intervention (a read-only index). The `retryable` flag
//! distinguishes the two: retryable blocks are worth waiting out, the rest
//! fail the operation immediately.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The kind of access a block forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBlockLevel {
    Read,
    Write,
    Metadata,
}

/// One block, global or scoped to an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBlock {
    /// Stable identifier, unique among known blocks.
    pub id: u32,

    /// Human-readable description, surfaced in error messages.
    pub description: String,

    /// Whether the blocked operation may succeed once the state changes.
    pub retryable: bool,

    levels: Vec<ClusterBlockLevel>,
}

impl ClusterBlock {
    pub fn new(
        id: u32,
        description: impl Into<String>,
        retryable: bool,
        levels: Vec<ClusterBlockLevel>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            retryable,
            levels,
        }
    }

    pub fn contains(&self, level: ClusterBlockLevel) -> bool {
        self.levels.contains(&level)
    }
}

/// All blocks of an observed cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBlocks {
    global: Vec<ClusterBlock>,
    indices: HashMap<String, Vec<ClusterBlock>>,
}

impl ClusterBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, block: ClusterBlock) -> Self {
        self.global.push(block);
        self
    }

    pub fn with_index(mut self, index: impl Into<String>, block: ClusterBlock) -> Self {
        self.indices.entry(index.into()).or_default().push(block);
        self
    }

    /// Returns the first global block at the given level, if any.
    pub fn global_block(&self, level: ClusterBlockLevel) -> Option<&ClusterBlock> {
        self.global.iter().find(|block| block.contains(level))
    }

    /// Returns the first block on the given index at the given level, global
    /// blocks included.
    pub fn index_block(&self, index: &str, level: ClusterBlockLevel) -> Option<&ClusterBlock> {
        self.indices
            .get(index)
            .and_then(|blocks| blocks.iter().find(|block| block.contains(level)))
    }
}

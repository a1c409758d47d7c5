//! Shard routing tables.
//!
//! A [`ShardRouting`] describes one copy of one shard: its role (primary or
//! replica), its lifecycle state, and the node(s) it lives on. A relocating
//! copy is addressed on both the source and the destination node until the
//! move completes, which is why it exposes both `current_node` and
//! `relocating_node`.

use std::collections::{BTreeMap, HashMap};

use dolomite_types::{NodeId, ShardId};
use serde::{Deserialize, Serialize};

// ============================================================================
// ShardRouting
// ============================================================================

/// Lifecycle state of one shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardRoutingState {
    /// Not allocated to any node.
    Unassigned,
    /// Allocated and recovering; not yet able to serve operations.
    Initializing,
    /// Allocated and serving.
    Started,
    /// Serving while being moved to another node.
    Relocating,
}

/// One copy of one shard, as recorded in the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    pub shard_id: ShardId,
    pub primary: bool,
    pub state: ShardRoutingState,
    pub current_node: Option<NodeId>,
    pub relocating_node: Option<NodeId>,
}

impl ShardRouting {
    pub fn unassigned(shard_id: ShardId, primary: bool) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Unassigned,
            current_node: None,
            relocating_node: None,
        }
    }

    pub fn initializing(shard_id: ShardId, primary: bool, node: impl Into<NodeId>) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Initializing,
            current_node: Some(node.into()),
            relocating_node: None,
        }
    }

    pub fn started(shard_id: ShardId, primary: bool, node: impl Into<NodeId>) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Started,
            current_node: Some(node.into()),
            relocating_node: None,
        }
    }

    pub fn relocating(
        shard_id: ShardId,
        primary: bool,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
    ) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Relocating,
            current_node: Some(from.into()),
            relocating_node: Some(to.into()),
        }
    }

    /// An active copy can serve operations.
    pub fn active(&self) -> bool {
        matches!(
            self.state,
            ShardRoutingState::Started | ShardRoutingState::Relocating
        )
    }

    pub fn unassigned_state(&self) -> bool {
        self.state == ShardRoutingState::Unassigned
    }

    pub fn relocating_state(&self) -> bool {
        self.state == ShardRoutingState::Relocating
    }

    pub fn assigned(&self) -> bool {
        self.current_node.is_some()
    }
}

// ============================================================================
// IndexShardRoutingTable
// ============================================================================

/// All copies of one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    shards: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    pub fn new(shards: Vec<ShardRouting>) -> Self {
        Self { shards }
    }

    /// Number of copies, assigned or not.
    pub fn size(&self) -> usize {
        self.shards.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter()
    }

    /// Copies currently able to serve operations.
    pub fn active_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter().filter(|shard| shard.active())
    }

    pub fn active_count(&self) -> usize {
        self.active_shards().count()
    }

    /// The primary copy, if the table has one.
    pub fn primary(&self) -> Option<&ShardRouting> {
        self.shards.iter().find(|shard| shard.primary)
    }
}

impl<'a> IntoIterator for &'a IndexShardRoutingTable {
    type Item = &'a ShardRouting;
    type IntoIter = std::slice::Iter<'a, ShardRouting>;

    fn into_iter(self) -> Self::IntoIter {
        self.shards.iter()
    }
}

// ============================================================================
// IndexRoutingTable / RoutingTable
// ============================================================================

/// Routing for all shards of one index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard(mut self, number: u32, table: IndexShardRoutingTable) -> Self {
        self.shards.insert(number, table);
        self
    }

    pub fn shard(&self, number: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&number)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Routing for every index in the observed state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    indices: HashMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: impl Into<String>, table: IndexRoutingTable) -> Self {
        self.indices.insert(index.into(), table);
        self
    }

    pub fn index(&self, index: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(index)
    }

    /// Convenience lookup straight to one shard's table.
    pub fn shard_table(&self, shard_id: &ShardId) -> Option<&IndexShardRoutingTable> {
        self.index(shard_id.index())
            .and_then(|index| index.shard(shard_id.number()))
    }
}

//! The versioned cluster-state snapshot.

use serde::{Deserialize, Serialize};

use crate::block::ClusterBlocks;
use crate::metadata::Metadata;
use crate::node::DiscoveryNodes;
use crate::routing::RoutingTable;

/// One observed cluster state.
///
/// Snapshots are immutable; a new state replaces the whole snapshot and
/// bumps `version`. Phases capture an `Arc<ClusterState>` once and make all
/// decisions for one attempt against that capture, so a decision is never
/// split across two different states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Monotonically increasing state version.
    pub version: u64,
    pub nodes: DiscoveryNodes,
    pub routing: RoutingTable,
    pub metadata: Metadata,
    pub blocks: ClusterBlocks,
}

impl ClusterState {
    pub fn new(version: u64, nodes: DiscoveryNodes) -> Self {
        Self {
            version,
            nodes,
            routing: RoutingTable::new(),
            metadata: Metadata::new(),
            blocks: ClusterBlocks::new(),
        }
    }

    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_blocks(mut self, blocks: ClusterBlocks) -> Self {
        self.blocks = blocks;
        self
    }
}

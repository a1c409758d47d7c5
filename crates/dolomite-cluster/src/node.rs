//! Discovery nodes: cluster membership as observed locally.

use std::collections::HashMap;

use dolomite_types::NodeId;
use serde::{Deserialize, Serialize};

/// One known node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Stable identifier of the node.
    pub id: NodeId,

    /// Human-readable node name.
    pub name: String,

    /// Publish address, as a display string. The transport layer resolves
    /// it; this model only carries it for diagnostics.
    pub address: String,
}

impl DiscoveryNode {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
        }
    }
}

/// The set of nodes in an observed cluster state.
///
/// `local` identifies the node this snapshot was taken on; `master` is the
/// elected master if one is known. Both are plain observations and can be
/// stale like everything else in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNodes {
    local: NodeId,
    master: Option<NodeId>,
    nodes: HashMap<NodeId, DiscoveryNode>,
}

impl DiscoveryNodes {
    /// Creates a node set containing only the local node.
    pub fn new(local: DiscoveryNode) -> Self {
        let local_id = local.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(local_id.clone(), local);
        Self {
            local: local_id,
            master: None,
            nodes,
        }
    }

    /// Adds a node to the set, replacing any previous entry with the same id.
    pub fn with_node(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Marks a node as the elected master.
    pub fn with_master(mut self, master: impl Into<NodeId>) -> Self {
        self.master = Some(master.into());
        self
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    pub fn master_node_id(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn get(&self, id: &NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

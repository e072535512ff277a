//! A single layer in the graph hierarchy containing node adjacency lists.

use parking_lot::RwLock;

/// Unique identifier for a node in the graph. Internal ids are assigned
/// sequentially at insertion, so node `c` holds coarse centroid `c`.
pub type NodeId = usize;

/// One layer of adjacency lists.
#[derive(Debug)]
pub struct Layer {
    /// Adjacency list: `node_id -> neighbor node ids`.
    neighbors: Vec<RwLock<Vec<NodeId>>>,
}

impl Layer {
    /// Creates a new layer with the given capacity.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Ensures the layer has a slot for `node_id`.
    pub(crate) fn ensure_capacity(&mut self, node_id: NodeId) {
        while self.neighbors.len() <= node_id {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    /// Returns a copy of the neighbors of a node.
    pub(crate) fn get_neighbors(&self, node_id: NodeId) -> Vec<NodeId> {
        if node_id < self.neighbors.len() {
            self.neighbors[node_id].read().clone()
        } else {
            Vec::new()
        }
    }

    /// Replaces the neighbors of a node.
    pub(crate) fn set_neighbors(&self, node_id: NodeId, neighbors: Vec<NodeId>) {
        if node_id < self.neighbors.len() {
            *self.neighbors[node_id].write() = neighbors;
        }
    }

    /// Exports all adjacency lists for persistence.
    pub(crate) fn snapshot(&self) -> Vec<Vec<NodeId>> {
        self.neighbors.iter().map(|n| n.read().clone()).collect()
    }

    /// Rebuilds a layer from persisted adjacency lists.
    pub(crate) fn from_adjacency(adjacency: Vec<Vec<NodeId>>) -> Self {
        Self {
            neighbors: adjacency.into_iter().map(RwLock::new).collect(),
        }
    }
}

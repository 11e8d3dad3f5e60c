//! Immutable node/edge set handed to the render tick

use std::collections::HashMap;

use super::{Edge, Node, NodeId};
use crate::core::types::Vec3;

/// The merged node/edge pool visible to culling for one or more frames.
///
/// Built by the loader (or the host) and shared behind an `Arc`. The
/// generation counter changes whenever the node set or positions change, which
/// is what the culler uses to decide when to rebuild its octree.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<NodeId, usize>,
    generation: u64,
}

impl GraphSnapshot {
    /// Build a snapshot, enforcing unique node ids and edge exclusivity
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, generation: u64) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        let mut unique = Vec::with_capacity(nodes.len());
        for node in nodes {
            if index.contains_key(&node.id) {
                continue;
            }
            index.insert(node.id.clone(), unique.len());
            unique.push(node);
        }

        let edges = edges
            .into_iter()
            .filter(|edge| edge.connects(|id| index.contains_key(id)))
            .collect();

        Self { nodes: unique, edges, index, generation }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    /// Replace the generation, used by owners that renumber adopted snapshots
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Overwrite positions of listed nodes in place.
    ///
    /// Unknown ids and non-finite positions are skipped. Returns the largest
    /// displacement, which the caller compares against its rebuild threshold
    /// before bumping the generation.
    pub fn set_positions(&mut self, positions: &[(NodeId, Vec3)]) -> f32 {
        let mut largest = 0.0f32;
        for (id, position) in positions {
            if !position.is_finite() {
                log::warn!("Ignoring non-finite layout position for node {}", id);
                continue;
            }
            if let Some(&i) = self.index.get(id) {
                largest = largest.max(self.nodes[i].position.distance(*position));
                self.nodes[i].position = *position;
            }
        }
        largest
    }
}

//! Graph edges

use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// Edge type tag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Reference,
    Related,
    Tagged,
    Authored,
    Derived,
    #[default]
    Other,
}

/// A link between two nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f32,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            weight: 1.0,
            kind: EdgeKind::Other,
        }
    }

    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }

    /// An edge is kept only when both endpoints are present
    pub fn connects(&self, mut present: impl FnMut(&NodeId) -> bool) -> bool {
        present(&self.source) && present(&self.target)
    }

    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Edge>() + self.id.len()
    }
}

/// Indices of the edges whose endpoints are both present
pub fn connected_edges<'a>(
    edges: &'a [Edge],
    mut present: impl FnMut(&NodeId) -> bool + 'a,
) -> impl Iterator<Item = usize> + 'a {
    edges
        .iter()
        .enumerate()
        .filter(move |(_, edge)| edge.connects(&mut present))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_connected_edges_require_both_endpoints() {
        let edges = vec![
            Edge::new("ab", "a", "b"),
            Edge::new("bc", "b", "c"),
            Edge::new("ca", "c", "a"),
        ];
        let present: HashSet<NodeId> = ["a", "b"].into_iter().map(NodeId::from).collect();
        let kept: Vec<usize> = connected_edges(&edges, |id| present.contains(id)).collect();
        assert_eq!(kept, vec![0]);
    }

    #[test]
    fn test_self_loop() {
        let edge = Edge::new("aa", "a", "a");
        assert!(edge.connects(|id| id.as_str() == "a"));
        assert!(!edge.connects(|_| false));
    }
}

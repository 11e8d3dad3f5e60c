//! Data source boundary
//!
//! The core never knows where graph data lives. A host implements
//! [`GraphSource`] over its storage or network layer and the loader calls it
//! once per chunk.

use std::future::Future;

use serde::{Deserialize, Serialize};

use super::chunk::ChunkId;
use crate::core::types::{Result, Vec3};
use crate::graph::GraphPayload;

/// One spatial fetch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkQuery {
    /// Chunk the request is for, used in logs and errors
    pub chunk: ChunkId,
    pub center: Vec3,
    pub radius: f32,
    pub max_nodes: usize,
}

/// Asynchronous graph data provider
///
/// Implementations return nodes within `radius` of `center` (at most
/// `max_nodes`) and any edges touching them. Transient failures should be
/// reported as [`crate::core::Error::Source`]; the loader retries them.
pub trait GraphSource: Send + Sync + 'static {
    fn fetch(&self, query: ChunkQuery) -> impl Future<Output = Result<GraphPayload>> + Send;
}

/// Source serving a fixed in-memory graph
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    payload: GraphPayload,
}

impl MemorySource {
    pub fn new(payload: GraphPayload) -> Self {
        Self { payload }
    }
}

impl GraphSource for MemorySource {
    async fn fetch(&self, query: ChunkQuery) -> Result<GraphPayload> {
        let radius_sq = query.radius * query.radius;
        let nodes: Vec<_> = self
            .payload
            .nodes
            .iter()
            .filter(|n| n.position.distance_squared(query.center) <= radius_sq)
            .take(query.max_nodes)
            .cloned()
            .collect();
        let edges = self
            .payload
            .edges
            .iter()
            .filter(|e| nodes.iter().any(|n| n.id == e.source || n.id == e.target))
            .cloned()
            .collect();
        Ok(GraphPayload { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, NodeKind};

    #[tokio::test]
    async fn test_memory_source_filters_by_sphere() {
        let source = MemorySource::new(GraphPayload {
            nodes: vec![
                Node::new("in", NodeKind::Concept, Vec3::new(10.0, 0.0, 0.0)),
                Node::new("out", NodeKind::Concept, Vec3::new(500.0, 0.0, 0.0)),
            ],
            edges: vec![Edge::new("e", "in", "out")],
        });
        let payload = source
            .fetch(ChunkQuery { chunk: ChunkId::new(0, 0, 0), center: Vec3::ZERO, radius: 50.0, max_nodes: 10 })
            .await
            .unwrap();
        assert_eq!(payload.nodes.len(), 1);
        assert_eq!(payload.edges.len(), 1);
    }
}

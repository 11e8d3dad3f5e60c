//! Validation at the data-source boundary
//!
//! Payloads from the data source are trusted except for geometry: a node with
//! a non-finite position or radius would poison the octree bounds and the
//! spatial hash, so it is rejected here and never reaches either structure.

use std::collections::HashSet;

use super::{Edge, GraphPayload, Node, NodeId};

/// Counts from one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    pub accepted_nodes: usize,
    pub rejected_nodes: usize,
    pub duplicate_nodes: usize,
    pub accepted_edges: usize,
    pub dropped_edges: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.accepted_nodes += other.accepted_nodes;
        self.rejected_nodes += other.rejected_nodes;
        self.duplicate_nodes += other.duplicate_nodes;
        self.accepted_edges += other.accepted_edges;
        self.dropped_edges += other.dropped_edges;
    }
}

/// Result of ingesting a payload
#[derive(Debug, Default)]
pub struct Ingested {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub report: IngestReport,
}

/// Stateful validator, remembers which ids were already reported
#[derive(Debug, Default)]
pub struct Ingestor {
    reported: HashSet<NodeId>,
}

impl Ingestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a payload: drop non-finite nodes, duplicate ids and dangling edges
    pub fn ingest(&mut self, payload: GraphPayload) -> Ingested {
        self.validate(payload, true)
    }

    /// Validate one piece of a larger graph.
    ///
    /// Edges are kept when at least one endpoint is in the payload; the other
    /// end may arrive with a different piece.
    pub fn ingest_fragment(&mut self, payload: GraphPayload) -> Ingested {
        self.validate(payload, false)
    }

    fn validate(&mut self, payload: GraphPayload, closed: bool) -> Ingested {
        let mut report = IngestReport::default();
        let mut seen: HashSet<NodeId> = HashSet::with_capacity(payload.nodes.len());
        let mut nodes = Vec::with_capacity(payload.nodes.len());

        for mut node in payload.nodes {
            if !node.is_finite() {
                report.rejected_nodes += 1;
                if self.reported.insert(node.id.clone()) {
                    log::warn!(
                        "Rejecting node {} with non-finite geometry (position {:?}, radius {})",
                        node.id,
                        node.position,
                        node.radius
                    );
                }
                continue;
            }
            if !seen.insert(node.id.clone()) {
                report.duplicate_nodes += 1;
                log::trace!("Duplicate node {} in payload, keeping first", node.id);
                continue;
            }
            node.radius = node.radius.max(0.0);
            node.confidence = if node.confidence.is_nan() {
                1.0
            } else {
                node.confidence.clamp(0.0, 1.0)
            };
            nodes.push(node);
        }
        report.accepted_nodes = nodes.len();

        let offered_edges = payload.edges.len();
        let edges: Vec<Edge> = payload
            .edges
            .into_iter()
            .filter(|edge| {
                if closed {
                    edge.connects(|id| seen.contains(id))
                } else {
                    seen.contains(&edge.source) || seen.contains(&edge.target)
                }
            })
            .collect();
        report.accepted_edges = edges.len();
        report.dropped_edges = offered_edges - edges.len();

        Ingested { nodes, edges, report }
    }

    /// Number of distinct ids ever rejected
    pub fn rejected_ids(&self) -> usize {
        self.reported.len()
    }
}

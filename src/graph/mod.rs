//! Graph data model: nodes, edges, ingestion and the shared snapshot

pub mod edge;
pub mod ingest;
pub mod node;
pub mod snapshot;

pub use edge::{Edge, EdgeKind};
pub use ingest::{IngestReport, Ingested, Ingestor};
pub use node::{Color, MetaValue, Metadata, Node, NodeId, NodeKind};
pub use snapshot::GraphSnapshot;

use serde::{Deserialize, Serialize};

/// Nodes and edges as returned by the data source, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphPayload {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

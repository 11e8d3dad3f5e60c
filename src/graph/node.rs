//! Graph nodes as produced by the layout/data layer

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;

/// Stable node identifier
///
/// Backed by `Arc<str>` so the many maps keyed by node id (LOD state, slot
/// ownership, chunk ownership) share one allocation per id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Node type tag, one instance pool per kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Document,
    Concept,
    Tag,
    Person,
    Insight,
    Source,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Document,
        NodeKind::Concept,
        NodeKind::Tag,
        NodeKind::Person,
        NodeKind::Insight,
        NodeKind::Source,
    ];

    /// Dense index, usable for per-kind arrays
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Concept => "concept",
            NodeKind::Tag => "tag",
            NodeKind::Person => "person",
            NodeKind::Insight => "insight",
            NodeKind::Source => "source",
        }
    }
}

/// Linear RGBA color
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color(pub [f32; 4]);

impl Color {
    pub const WHITE: Color = Color([1.0, 1.0, 1.0, 1.0]);

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self([r, g, b, 1.0])
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// A single metadata value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<MetaValue>),
}

/// Opaque per-node metadata, carried through untouched
pub type Metadata = BTreeMap<String, MetaValue>;

/// A graph node with its laid-out position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Vec3,
    pub radius: f32,
    pub color: Color,
    pub kind: NodeKind,
    #[serde(default)]
    pub metadata: Metadata,
    /// Confidence in [0, 1], rendered as opacity
    pub confidence: f32,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, position: Vec3) -> Self {
        Self {
            id: id.into(),
            position,
            radius: 1.0,
            color: Color::default(),
            kind,
            metadata: Metadata::new(),
            confidence: 1.0,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Whether position and radius are usable for spatial structures
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.radius.is_finite()
    }

    /// Rough in-memory footprint, used for cache accounting
    pub fn estimated_bytes(&self) -> usize {
        let metadata: usize = self
            .metadata
            .iter()
            .map(|(k, v)| k.len() + meta_value_bytes(v))
            .sum();
        std::mem::size_of::<Node>() + self.id.as_str().len() + metadata
    }
}

fn meta_value_bytes(value: &MetaValue) -> usize {
    match value {
        MetaValue::Flag(_) | MetaValue::Number(_) => 8,
        MetaValue::Text(s) => s.len(),
        MetaValue::List(items) => items.iter().map(meta_value_bytes).sum(),
    }
}

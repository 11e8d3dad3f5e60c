//! Chunk addressing and loaded chunk data

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::types::{IVec3, Vec3};
use crate::graph::{Edge, Node};
use crate::math::Aabb;

/// Fixed per-chunk bookkeeping added to the node and edge estimates
const CHUNK_OVERHEAD_BYTES: usize = 256;

/// Integer grid cell of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub IVec3);

/// Lexicographic on `(x, y, z)`
impl Ord for ChunkId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.to_array().cmp(&other.0.to_array())
    }
}

impl PartialOrd for ChunkId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ChunkId {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    /// Chunk containing a world position
    pub fn from_position(position: Vec3, chunk_size: f32) -> Self {
        Self((position / chunk_size).floor().as_ivec3())
    }

    /// World-space center of the cell
    pub fn center(&self, chunk_size: f32) -> Vec3 {
        (self.0.as_vec3() + Vec3::splat(0.5)) * chunk_size
    }

    /// Half-diagonal of a cell, the radius of its bounding sphere
    pub fn radius(chunk_size: f32) -> f32 {
        chunk_size * 3f32.sqrt() * 0.5
    }

    pub fn bounds(&self, chunk_size: f32) -> Aabb {
        let min = self.0.as_vec3() * chunk_size;
        Aabb::new(min, min + Vec3::splat(chunk_size))
    }

    /// Whether a position falls in this cell, using the same flooring as [`ChunkId::from_position`]
    pub fn owns(&self, position: Vec3, chunk_size: f32) -> bool {
        Self::from_position(position, chunk_size) == *self
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.0.x, self.0.y, self.0.z)
    }
}

/// A chunk resident in the cache
#[derive(Debug, Clone)]
pub struct LoadedChunk {
    pub id: ChunkId,
    pub center: Vec3,
    pub radius: f32,
    /// Nodes owned by this chunk
    pub nodes: Vec<Node>,
    /// Edges delivered with the chunk, may reference nodes of other chunks
    pub edges: Vec<Edge>,
    /// Estimated memory footprint
    pub size_bytes: usize,
    pub loaded_at: Instant,
    pub last_access: Instant,
    pub load_duration: Duration,
}

impl LoadedChunk {
    pub fn new(id: ChunkId, chunk_size: f32, nodes: Vec<Node>, edges: Vec<Edge>, load_duration: Duration, now: Instant) -> Self {
        let size_bytes = CHUNK_OVERHEAD_BYTES
            + nodes.iter().map(Node::estimated_bytes).sum::<usize>()
            + edges.iter().map(Edge::estimated_bytes).sum::<usize>();
        Self {
            id,
            center: id.center(chunk_size),
            radius: ChunkId::radius(chunk_size),
            nodes,
            edges,
            size_bytes,
            loaded_at: now,
            last_access: now,
            load_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    #[test]
    fn test_addressing() {
        assert_eq!(ChunkId::from_position(Vec3::new(150.0, -1.0, 0.0), 100.0), ChunkId::new(1, -1, 0));
        let id = ChunkId::new(1, -1, 0);
        assert_eq!(id.center(100.0), Vec3::new(150.0, -50.0, 50.0));
        assert!(id.owns(Vec3::new(199.9, -0.1, 0.0), 100.0));
        assert!(!id.owns(Vec3::new(200.0, -0.1, 0.0), 100.0));
        assert!((ChunkId::radius(100.0) - 86.602_54).abs() < 1e-3);
        assert_eq!(id.to_string(), "1_-1_0");
    }

    #[test]
    fn test_size_estimate_grows_with_content() {
        let now = Instant::now();
        let empty = LoadedChunk::new(ChunkId::new(0, 0, 0), 100.0, Vec::new(), Vec::new(), Duration::ZERO, now);
        let full = LoadedChunk::new(
            ChunkId::new(0, 0, 0),
            100.0,
            vec![Node::new("a", NodeKind::Concept, Vec3::ONE)],
            vec![Edge::new("e", "a", "b")],
            Duration::ZERO,
            now,
        );
        assert_eq!(empty.size_bytes, CHUNK_OVERHEAD_BYTES);
        assert!(full.size_bytes > empty.size_bytes);
    }

    #[test]
    fn test_ordering_and_serde() {
        let mut ids = vec![ChunkId::new(1, 0, 0), ChunkId::new(0, 5, 0), ChunkId::new(0, 0, -3)];
        ids.sort();
        assert_eq!(ids, vec![ChunkId::new(0, 0, -3), ChunkId::new(0, 5, 0), ChunkId::new(1, 0, 0)]);

        let json = serde_json::to_string(&ChunkId::new(2, -1, 7)).unwrap();
        assert_eq!(serde_json::from_str::<ChunkId>(&json).unwrap(), ChunkId::new(2, -1, 7));
    }
}

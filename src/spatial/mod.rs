//! Spatial structures: the per-frame octree and the chunk grid

pub mod hash;
pub mod octree;

pub use hash::SpatialHash;
pub use octree::{OctreeNode, OctreeQuery, SpatialIndex};

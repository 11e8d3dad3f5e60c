//! Bounded-depth octree over node positions
//!
//! The tree stores indices into the node slice it was built from. It is
//! rebuilt wholesale whenever the node set changes; there is no incremental
//! update path.

use crate::core::types::Vec3;
use crate::graph::Node;
use crate::math::{Aabb, Frustum};

/// Index of the root in the node arena
const ROOT: u32 = 0;

/// Either a bucket of point indices or eight children
#[derive(Debug, Clone)]
enum Cell {
    Leaf(Vec<u32>),
    /// Arena indices of the children, ordered by [`Aabb::child_octant`]
    Branch([u32; 8]),
}

/// One node of the tree
#[derive(Debug, Clone)]
pub struct OctreeNode {
    bounds: Aabb,
    depth: u8,
    cell: Cell,
}

impl OctreeNode {
    fn leaf(bounds: Aabb, depth: u8) -> Self {
        Self { bounds, depth, cell: Cell::Leaf(Vec::new()) }
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.cell, Cell::Leaf(_))
    }
}

/// Result of a frustum query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OctreeQuery {
    /// Indices of every point in a surviving leaf
    pub indices: Vec<u32>,
    /// Tree nodes visited, including pruned ones
    pub traversal_count: usize,
}

/// Octree spatial index
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    /// All tree nodes (root is at index 0 when non-empty)
    nodes: Vec<OctreeNode>,
    max_depth: u8,
    leaf_threshold: usize,
    point_count: usize,
}

impl SpatialIndex {
    /// Build from graph nodes
    pub fn build(nodes: &[Node], max_depth: u8, leaf_threshold: usize) -> Self {
        let positions: Vec<Vec3> = nodes.iter().map(|n| n.position).collect();
        Self::build_from_points(&positions, max_depth, leaf_threshold)
    }

    /// Build from raw positions. Points must be finite, which ingestion guarantees.
    pub fn build_from_points(points: &[Vec3], max_depth: u8, leaf_threshold: usize) -> Self {
        let mut index = Self {
            nodes: Vec::new(),
            max_depth,
            leaf_threshold: leaf_threshold.max(1),
            point_count: points.len(),
        };

        let Some(bounds) = Aabb::from_points(points.iter().copied()) else {
            return index;
        };
        let cube = bounds.cubed(1.0);
        let pad = (cube.size().x * 0.01).max(0.5);
        index.nodes.push(OctreeNode::leaf(cube.padded(pad), 0));

        for (i, point) in points.iter().enumerate() {
            index.insert(i as u32, *point, points);
        }

        log::trace!(
            "Built octree: {} points, {} nodes, depth {}",
            index.point_count,
            index.nodes.len(),
            index.depth()
        );
        index
    }

    fn insert(&mut self, item: u32, point: Vec3, points: &[Vec3]) {
        let mut current = ROOT;
        loop {
            let node = &mut self.nodes[current as usize];
            match &mut node.cell {
                Cell::Branch(children) => {
                    current = children[node.bounds.octant_of(point) as usize];
                }
                Cell::Leaf(items) => {
                    items.push(item);
                    if items.len() > self.leaf_threshold && node.depth < self.max_depth {
                        self.subdivide(current, points);
                    }
                    return;
                }
            }
        }
    }

    /// Split a leaf into eight children and hand its items down one level
    fn subdivide(&mut self, at: u32, points: &[Vec3]) {
        let first_child = self.nodes.len() as u32;
        let (bounds, depth) = {
            let node = &self.nodes[at as usize];
            (node.bounds, node.depth)
        };

        let mut buckets: [Vec<u32>; 8] = Default::default();
        if let Cell::Leaf(items) = &mut self.nodes[at as usize].cell {
            for item in items.drain(..) {
                let octant = bounds.octant_of(points[item as usize]);
                buckets[octant as usize].push(item);
            }
        }

        for (octant, bucket) in buckets.into_iter().enumerate() {
            let mut child = OctreeNode::leaf(bounds.child_octant(octant as u8), depth + 1);
            child.cell = Cell::Leaf(bucket);
            self.nodes.push(child);
        }

        let children: [u32; 8] = std::array::from_fn(|i| first_child + i as u32);
        self.nodes[at as usize].cell = Cell::Branch(children);
    }

    /// Every point in a leaf whose box touches the frustum.
    ///
    /// Leaves are not filtered per point, so the result may include points
    /// just outside the frustum but never omits one inside it.
    pub fn query(&self, frustum: &Frustum) -> OctreeQuery {
        let mut result = OctreeQuery::default();
        if self.nodes.is_empty() {
            return result;
        }

        let mut stack = vec![ROOT];
        while let Some(current) = stack.pop() {
            result.traversal_count += 1;
            let node = &self.nodes[current as usize];
            if !frustum.intersects_aabb(&node.bounds) {
                continue;
            }
            match &node.cell {
                Cell::Leaf(items) => result.indices.extend_from_slice(items),
                Cell::Branch(children) => stack.extend_from_slice(children),
            }
        }
        result
    }

    /// Root bounds, `None` when built from no points
    pub fn bounds(&self) -> Option<&Aabb> {
        self.nodes.first().map(|n| &n.bounds)
    }

    /// Deepest level reached
    pub fn depth(&self) -> u8 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Number of points indexed
    pub fn len(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Plane;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Small deterministic generator so the fixtures are stable
    struct XorShift(u64);

    impl XorShift {
        fn next_f32(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 40) as f32 / (1u64 << 24) as f32
        }
    }

    fn uniform_cube(count: usize, size: f32, seed: u64) -> Vec<Vec3> {
        let mut rng = XorShift(seed);
        (0..count)
            .map(|_| Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32()) * size)
            .collect()
    }

    #[test]
    fn test_empty_build() {
        let index = SpatialIndex::build_from_points(&[], 6, 10);
        assert!(index.is_empty());
        assert!(index.bounds().is_none());
        let frustum = Frustum::half_space(Plane::new(Vec3::X, 0.0));
        assert_eq!(index.query(&frustum), OctreeQuery::default());
    }

    #[test]
    fn test_subdivides_past_threshold() {
        let points = uniform_cube(100, 10.0, 3);
        let index = SpatialIndex::build_from_points(&points, 4, 8);
        assert!(index.node_count() > 1);
        assert!(index.depth() <= 4);
        // Branches always have exactly eight children
        assert_eq!((index.node_count() - 1) % 8, 0);
    }

    #[test]
    fn test_depth_cap_keeps_overfull_leaf() {
        // Identical points can never be separated
        let points = vec![Vec3::ONE; 50];
        let index = SpatialIndex::build_from_points(&points, 3, 4);
        assert_eq!(index.depth(), 3);
        let frustum = Frustum::half_space(Plane::new(Vec3::X, 0.0));
        assert_eq!(index.query(&frustum).indices.len(), 50);
    }

    #[test]
    fn test_half_space_scenario() {
        let points = uniform_cube(1000, 1000.0, 0x9E37_79B9_7F4A_7C15);
        let index = SpatialIndex::build_from_points(&points, 6, 10);
        assert_eq!(index.len(), 1000);

        // Everything with x >= 250 is in front of the camera plane
        let frustum = Frustum::half_space(Plane::from_point_normal(Vec3::new(250.0, 0.0, 0.0), Vec3::X));
        let result = index.query(&frustum);
        let visible: HashSet<u32> = result.indices.iter().copied().collect();
        assert_eq!(visible.len(), result.indices.len(), "no point reported twice");

        let culled: HashSet<u32> = (0..1000u32).filter(|i| !visible.contains(i)).collect();
        assert!(!culled.is_empty(), "query must be a strict subset");
        assert_eq!(visible.len() + culled.len(), 1000);

        for (i, p) in points.iter().enumerate() {
            if frustum.contains_point(*p) {
                assert!(visible.contains(&(i as u32)), "point {i} at {p:?} omitted");
            }
        }
        assert!(result.traversal_count > 1);
        assert!(result.traversal_count <= index.node_count());
    }

    fn arb_point() -> impl Strategy<Value = Vec3> {
        (-500.0f32..500.0, -500.0f32..500.0, -500.0f32..500.0).prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    proptest! {
        #[test]
        fn prop_query_never_omits_points(
            points in prop::collection::vec(arb_point(), 0..300),
            eye in arb_point(),
            target in arb_point(),
            max_depth in 1u8..8,
            leaf_threshold in 1usize..20,
        ) {
            prop_assume!(eye.distance(target) > 1.0);
            let up = if (target - eye).normalize().abs().y > 0.99 { Vec3::X } else { Vec3::Y };
            let view = glam::Mat4::look_at_rh(eye, target, up);
            let proj = glam::Mat4::perspective_rh(1.0, 1.5, 0.5, 800.0);
            let frustum = Frustum::from_view_projection(&(proj * view));

            let index = SpatialIndex::build_from_points(&points, max_depth, leaf_threshold);
            let found: HashSet<u32> = index.query(&frustum).indices.into_iter().collect();
            for (i, p) in points.iter().enumerate() {
                if frustum.contains_point(*p) {
                    prop_assert!(found.contains(&(i as u32)));
                }
            }
        }
    }
}

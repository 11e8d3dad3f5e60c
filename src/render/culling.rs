//! Frustum culling of the graph snapshot
//!
//! Produces the visible/culled partition of nodes and edges once per tick.
//! Nodes are tested through the octree; edge visibility is derived from the
//! visible node set and never tested on its own.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::{Camera, Error, Result};
use crate::graph::{GraphSnapshot, NodeId, edge::connected_edges};
use crate::spatial::SpatialIndex;

/// Upper bound on how far `IncreaseCulling` may widen the skip thresholds
const MAX_THRESHOLD_GROWTH: f32 = 4.0;

/// Culling configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    /// Camera movement below which the previous result may be reused
    pub position_threshold: f32,
    /// Camera rotation in radians below which the previous result may be reused
    pub rotation_threshold: f32,
    /// Recompute at least this often even when the camera is still
    pub min_update_interval: Duration,
    /// Frustum dilation in world units
    pub margin: f32,
    pub octree_max_depth: u8,
    pub leaf_threshold: usize,
    /// Layout moves smaller than this do not invalidate the octree
    pub rebuild_move_threshold: f32,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            position_threshold: 0.5,
            rotation_threshold: 0.01,
            min_update_interval: Duration::from_millis(100),
            margin: 0.0,
            octree_max_depth: 8,
            leaf_threshold: 16,
            rebuild_move_threshold: 1.0,
        }
    }
}

impl CullingConfig {
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("position threshold", self.position_threshold),
            ("rotation threshold", self.rotation_threshold),
            ("margin", self.margin),
            ("rebuild move threshold", self.rebuild_move_threshold),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::config(format!("culling {name} must be >= 0, got {value}")));
            }
        }
        if self.leaf_threshold == 0 {
            return Err(Error::config("octree leaf threshold must be > 0"));
        }
        if self.octree_max_depth == 0 || self.octree_max_depth > 21 {
            return Err(Error::config(format!(
                "octree max depth must be in 1..=21, got {}",
                self.octree_max_depth
            )));
        }
        Ok(())
    }
}

/// Culling statistics for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CullingStats {
    pub total_nodes: usize,
    pub visible_nodes: usize,
    pub culled_nodes: usize,
    pub total_edges: usize,
    pub visible_edges: usize,
    pub culled_edges: usize,
    pub traversal_count: usize,
    /// Culled nodes over total nodes
    pub cull_ratio: f32,
    pub compute_time_ms: f32,
    /// False when the previous node result was reused
    pub recomputed: bool,
    pub octree_rebuilds: u64,
}

/// Visible/culled partition, as indices into the snapshot's node and edge slices
#[derive(Debug, Clone, Default)]
pub struct CullResult {
    pub visible_nodes: Vec<u32>,
    pub visible_edges: Vec<u32>,
    pub culled_nodes: Vec<u32>,
    pub culled_edges: Vec<u32>,
    pub stats: CullingStats,
}

/// Camera pose of the last recompute
#[derive(Debug, Clone, Copy)]
struct CullPose {
    camera: Camera,
    at: Instant,
    generation: u64,
}

/// Orchestrates the octree and frustum test with a skip-if-unchanged path
pub struct FrustumCuller {
    config: CullingConfig,
    index: Option<(u64, SpatialIndex)>,
    last_pose: Option<CullPose>,
    last_visible: Vec<u32>,
    visible_ids: HashSet<NodeId>,
    last_traversal: usize,
    rebuilds: u64,
    /// Multiplier on the skip thresholds, raised by `increase_culling`
    threshold_growth: f32,
    margin: f32,
}

impl FrustumCuller {
    pub fn new(config: CullingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            margin: config.margin,
            config,
            index: None,
            last_pose: None,
            last_visible: Vec::new(),
            visible_ids: HashSet::new(),
            last_traversal: 0,
            rebuilds: 0,
            threshold_growth: 1.0,
        })
    }

    pub fn config(&self) -> &CullingConfig {
        &self.config
    }

    /// Current frustum margin
    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Number of octree rebuilds so far
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Whether the node result must be recomputed this tick
    fn needs_recompute(&self, graph: &GraphSnapshot, camera: &Camera, now: Instant) -> bool {
        let Some(pose) = &self.last_pose else {
            return true;
        };
        if pose.generation != graph.generation() {
            return true;
        }
        let moved = pose.camera.position.distance(camera.position)
            > self.config.position_threshold * self.threshold_growth;
        let rotated = pose.camera.rotation_delta(camera)
            > self.config.rotation_threshold * self.threshold_growth;
        // Projection changes always count as movement
        let reprojected = pose.camera.fov_y != camera.fov_y
            || pose.camera.aspect != camera.aspect
            || pose.camera.near != camera.near
            || pose.camera.far != camera.far;
        let stale = now.saturating_duration_since(pose.at) >= self.config.min_update_interval;
        moved || rotated || reprojected || stale
    }

    /// Partition the snapshot into visible and culled nodes and edges.
    ///
    /// A missing or degenerate camera and an empty snapshot both produce an
    /// empty visible set.
    pub fn cull(&mut self, graph: &GraphSnapshot, camera: Option<&Camera>, now: Instant) -> CullResult {
        let started = Instant::now();
        let camera = camera.filter(|c| c.is_valid());

        let Some(camera) = camera.filter(|_| !graph.is_empty()) else {
            self.last_pose = None;
            self.last_visible.clear();
            self.visible_ids.clear();
            return self.finish(graph, Vec::new(), 0, true, started);
        };

        if !self.needs_recompute(graph, camera, now) {
            let visible = self.last_visible.clone();
            let traversal = self.last_traversal;
            return self.finish(graph, visible, traversal, false, started);
        }

        let frustum = camera.frustum().dilated(self.margin);
        let query = self.index_for(graph).query(&frustum);

        let mut visible = query.indices;
        visible.sort_unstable();
        self.visible_ids = visible
            .iter()
            .map(|&i| graph.nodes()[i as usize].id.clone())
            .collect();
        self.last_visible = visible.clone();
        self.last_traversal = query.traversal_count;
        self.last_pose = Some(CullPose {
            camera: *camera,
            at: now,
            generation: graph.generation(),
        });

        self.finish(graph, visible, query.traversal_count, true, started)
    }

    /// Octree for this snapshot, rebuilt when the generation changed
    fn index_for(&mut self, graph: &GraphSnapshot) -> &SpatialIndex {
        let generation = graph.generation();
        if matches!(&self.index, Some((built, _)) if *built != generation) {
            self.index = None;
        }
        let rebuilds = &mut self.rebuilds;
        let config = &self.config;
        let (_, index) = self.index.get_or_insert_with(|| {
            let build_started = Instant::now();
            let index = SpatialIndex::build(graph.nodes(), config.octree_max_depth, config.leaf_threshold);
            *rebuilds += 1;
            log::debug!(
                "Octree rebuilt for generation {}: {} nodes, {} tree nodes, depth {} in {:.2}ms",
                generation,
                graph.len(),
                index.node_count(),
                index.depth(),
                build_started.elapsed().as_secs_f32() * 1000.0
            );
            (generation, index)
        });
        index
    }

    fn finish(
        &self,
        graph: &GraphSnapshot,
        visible_nodes: Vec<u32>,
        traversal_count: usize,
        recomputed: bool,
        started: Instant,
    ) -> CullResult {
        let total_nodes = graph.len();
        let mut is_visible = vec![false; total_nodes];
        for &i in &visible_nodes {
            is_visible[i as usize] = true;
        }
        let culled_nodes: Vec<u32> = (0..total_nodes as u32).filter(|&i| !is_visible[i as usize]).collect();

        let visible_edges: Vec<u32> = connected_edges(graph.edges(), |id| self.visible_ids.contains(id))
            .map(|i| i as u32)
            .collect();
        let culled_edges: Vec<u32> = {
            let mut visible = visible_edges.iter().peekable();
            (0..graph.edges().len() as u32)
                .filter(|i| {
                    if visible.peek() == Some(&i) {
                        visible.next();
                        false
                    } else {
                        true
                    }
                })
                .collect()
        };

        let stats = CullingStats {
            total_nodes,
            visible_nodes: visible_nodes.len(),
            culled_nodes: culled_nodes.len(),
            total_edges: graph.edges().len(),
            visible_edges: visible_edges.len(),
            culled_edges: culled_edges.len(),
            traversal_count,
            cull_ratio: if total_nodes == 0 { 0.0 } else { culled_nodes.len() as f32 / total_nodes as f32 },
            compute_time_ms: started.elapsed().as_secs_f32() * 1000.0,
            recomputed,
            octree_rebuilds: self.rebuilds,
        };

        CullResult { visible_nodes, visible_edges, culled_nodes, culled_edges, stats }
    }

    /// React to an `IncreaseCulling` signal: tighter frustum, lazier recomputes.
    ///
    /// Bounded, so repeated signals settle at a fixed point.
    pub fn increase_culling(&mut self, step: f32) {
        if !(step > 0.0 && step.is_finite()) {
            return;
        }
        let step = step.min(1.0);
        self.margin = (self.margin * (1.0 - step)).max(0.0);
        self.threshold_growth = (self.threshold_growth * (1.0 + step)).min(MAX_THRESHOLD_GROWTH);
        log::info!(
            "Culling tightened: margin {:.2}, threshold growth {:.2}",
            self.margin,
            self.threshold_growth
        );
    }

    /// Restore configured margin and thresholds
    pub fn reset_aggressiveness(&mut self) {
        self.margin = self.config.margin;
        self.threshold_growth = 1.0;
    }

    /// Forget the cached result so the next call recomputes
    pub fn invalidate(&mut self) {
        self.last_pose = None;
    }
}

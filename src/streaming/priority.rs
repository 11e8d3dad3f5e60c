//! Priority tiers and queue for chunk loading based on distance and visibility

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde::Serialize;

use super::chunk::ChunkId;
use super::config::StreamingConfig;
use crate::core::types::{IVec3, Vec3};
use crate::math::frustum::Frustum;

/// Load priority tier of a chunk, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Immediate,
    High,
    Medium,
    Low,
    /// Beyond the view distance, never requested
    Deferred,
}

impl PriorityTier {
    /// Request weight, each tier dominates everything below it
    pub fn weight(self) -> u32 {
        match self {
            Self::Immediate => 1000,
            Self::High => 100,
            Self::Medium => 10,
            Self::Low => 1,
            Self::Deferred => 0,
        }
    }

    /// Tier by camera distance alone
    pub fn classify(distance: f32, config: &StreamingConfig) -> Self {
        if distance < config.immediate_radius {
            Self::Immediate
        } else if distance < config.high_radius {
            Self::High
        } else if distance < config.medium_radius {
            Self::Medium
        } else if distance <= config.view_distance {
            Self::Low
        } else {
            Self::Deferred
        }
    }

    /// Tiers that count towards the loading progress
    pub fn is_essential(self) -> bool {
        matches!(self, Self::Immediate | Self::High | Self::Medium)
    }

    /// Tiers whose in-flight requests may be cancelled under low bandwidth
    pub fn is_expendable(self) -> bool {
        matches!(self, Self::Low | Self::Deferred)
    }
}

/// A chunk considered for loading this update
#[derive(Clone, Copy, Debug)]
pub struct ChunkCandidate {
    pub id: ChunkId,
    pub tier: PriorityTier,
    /// Distance from the camera to the chunk center
    pub distance: f32,
    /// Whether the chunk bounds touch the view frustum
    pub visible: bool,
    /// Whether prediction raised or added this chunk
    pub predicted: bool,
}

impl ChunkCandidate {
    pub fn weight(&self) -> u32 {
        self.tier.weight()
    }
}

impl PartialEq for ChunkCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ChunkCandidate {}

impl Ord for ChunkCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: heavier first, then closer, then a stable id order
        self.weight()
            .cmp(&other.weight())
            .then_with(|| other.distance.total_cmp(&self.distance))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ChunkCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue for chunk loading
#[derive(Default)]
pub struct ChunkPriorityQueue {
    heap: BinaryHeap<ChunkCandidate>,
}

impl ChunkPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Add a candidate, deferred chunks are never queued
    pub fn push(&mut self, candidate: ChunkCandidate) {
        if candidate.tier != PriorityTier::Deferred {
            self.heap.push(candidate);
        }
    }

    /// Highest priority candidate
    pub fn pop(&mut self) -> Option<ChunkCandidate> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Rebuild the queue for a camera position.
    ///
    /// Every cell whose center lies within the view distance is classified by
    /// distance. High and Medium chunks outside `frustum` drop to Low; the
    /// Immediate ring around the camera is kept regardless of view direction.
    /// Cells around `predicted` are raised to at least Medium.
    pub fn update(
        &mut self,
        camera_pos: Vec3,
        frustum: Option<&Frustum>,
        predicted: Option<Vec3>,
        config: &StreamingConfig,
    ) {
        self.clear();
        let mut candidates: HashMap<ChunkId, ChunkCandidate> = HashMap::new();

        for id in cells_within(camera_pos, config.view_distance, config.chunk_size) {
            let distance = camera_pos.distance(id.center(config.chunk_size));
            let mut tier = PriorityTier::classify(distance, config);
            let visible = frustum.is_none_or(|f| f.intersects_aabb(&id.bounds(config.chunk_size)));
            if !visible && matches!(tier, PriorityTier::High | PriorityTier::Medium) {
                tier = PriorityTier::Low;
            }
            candidates.insert(id, ChunkCandidate { id, tier, distance, visible, predicted: false });
        }

        if let Some(point) = predicted {
            let reach = ChunkId::radius(config.chunk_size) + config.chunk_size;
            for id in cells_within(point, reach, config.chunk_size) {
                let distance = camera_pos.distance(id.center(config.chunk_size));
                let entry = candidates.entry(id).or_insert_with(|| ChunkCandidate {
                    id,
                    tier: PriorityTier::Medium,
                    distance,
                    visible: frustum.is_none_or(|f| f.intersects_aabb(&id.bounds(config.chunk_size))),
                    predicted: true,
                });
                if entry.tier > PriorityTier::Medium {
                    entry.tier = PriorityTier::Medium;
                    entry.predicted = true;
                }
            }
        }

        for candidate in candidates.into_values() {
            self.push(candidate);
        }
    }

    /// Drain in priority order
    pub fn drain_sorted(&mut self) -> Vec<ChunkCandidate> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(candidate) = self.heap.pop() {
            out.push(candidate);
        }
        out
    }
}

/// Cells whose center lies within `radius` of `center`
fn cells_within(center: Vec3, radius: f32, chunk_size: f32) -> Vec<ChunkId> {
    let span = (radius / chunk_size).ceil() as i32 + 1;
    let origin = ChunkId::from_position(center, chunk_size).0;
    let radius_sq = radius * radius;
    let mut cells = Vec::new();
    for dx in -span..=span {
        for dy in -span..=span {
            for dz in -span..=span {
                let id = ChunkId(origin + IVec3::new(dx, dy, dz));
                if id.center(chunk_size).distance_squared(center) <= radius_sq {
                    cells.push(id);
                }
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Camera;

    fn config() -> StreamingConfig {
        StreamingConfig::default()
    }

    #[test]
    fn test_classify_by_distance() {
        let config = config();
        assert_eq!(PriorityTier::classify(10.0, &config), PriorityTier::Immediate);
        assert_eq!(PriorityTier::classify(200.0, &config), PriorityTier::High);
        assert_eq!(PriorityTier::classify(400.0, &config), PriorityTier::Medium);
        assert_eq!(PriorityTier::classify(500.0, &config), PriorityTier::Low);
        assert_eq!(PriorityTier::classify(501.0, &config), PriorityTier::Deferred);
        assert!(PriorityTier::Immediate.weight() > PriorityTier::High.weight());
        assert_eq!(PriorityTier::Deferred.weight(), 0);
    }

    #[test]
    fn test_queue_order() {
        let mut queue = ChunkPriorityQueue::new();
        let make = |x, tier, distance| ChunkCandidate {
            id: ChunkId::new(x, 0, 0),
            tier,
            distance,
            visible: true,
            predicted: false,
        };
        queue.push(make(0, PriorityTier::Low, 10.0));
        queue.push(make(1, PriorityTier::High, 250.0));
        queue.push(make(2, PriorityTier::High, 200.0));
        queue.push(make(3, PriorityTier::Deferred, 600.0));
        assert_eq!(queue.len(), 3);

        let order: Vec<i32> = queue.drain_sorted().iter().map(|c| c.id.0.x).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_frustum_downgrade_spares_immediate() {
        let config = config();
        // Looking down +X from the origin
        let camera = Camera::look_at(Vec3::new(50.0, 50.0, 50.0), Vec3::new(500.0, 50.0, 50.0), Vec3::Y);
        let frustum = camera.frustum();
        let mut queue = ChunkPriorityQueue::new();
        queue.update(camera.position, Some(&frustum), None, &config);
        let candidates = queue.drain_sorted();

        let behind_near = candidates.iter().find(|c| c.id == ChunkId::new(-1, 0, 0)).unwrap();
        assert_eq!(behind_near.tier, PriorityTier::Immediate);

        let behind_far = candidates.iter().find(|c| c.id == ChunkId::new(-3, 0, 0)).unwrap();
        assert!(!behind_far.visible);
        assert_eq!(behind_far.tier, PriorityTier::Low);

        let ahead = candidates.iter().find(|c| c.id == ChunkId::new(3, 0, 0)).unwrap();
        assert!(ahead.visible);
        assert_eq!(ahead.tier, PriorityTier::Medium);
        assert!(candidates.iter().all(|c| c.distance <= config.view_distance));
    }

    #[test]
    fn test_prediction_raises_without_demoting() {
        let config = config();
        let mut queue = ChunkPriorityQueue::new();
        let predicted = Vec3::new(750.0, 50.0, 50.0);
        queue.update(Vec3::new(50.0, 50.0, 50.0), None, Some(predicted), &config);
        let candidates = queue.drain_sorted();

        // Beyond the view distance but next to the predicted point
        let added = candidates.iter().find(|c| c.id == ChunkId::new(7, 0, 0)).unwrap();
        assert_eq!(added.tier, PriorityTier::Medium);
        assert!(added.predicted);

        let home = candidates.iter().find(|c| c.id == ChunkId::new(0, 0, 0)).unwrap();
        assert_eq!(home.tier, PriorityTier::Immediate);
    }
}

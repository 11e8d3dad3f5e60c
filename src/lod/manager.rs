//! Per-node LOD state machine with hysteresis

use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use super::config::LodConfig;
use crate::core::types::{Result, Vec3};
use crate::graph::{GraphSnapshot, NodeId};

/// Above this many visible nodes distances are computed in parallel
const PARALLEL_THRESHOLD: usize = 4096;

/// LOD state of one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LodState {
    /// Current level, 0 is highest fidelity
    pub level: u8,
    /// Cross-fade progress since the last level change, in [0, 1]
    pub progress: f32,
    /// Camera distance at the last evaluation
    pub distance: f32,
}

/// Summary of one update pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LodUpdate {
    pub evaluated: usize,
    pub changed: usize,
    pub created: usize,
    pub removed: usize,
}

/// Assigns detail levels to visible nodes
pub struct LodManager {
    config: LodConfig,
    states: HashMap<NodeId, LodState>,
    /// Global multiplier on every band distance
    scale: f32,
    last_rescale: Option<Instant>,
}

impl LodManager {
    /// Create a manager, rejecting invalid configuration
    pub fn new(config: LodConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            states: HashMap::new(),
            scale: 1.0,
            last_rescale: None,
        })
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn level_count(&self) -> usize {
        self.config.level_count()
    }

    /// Current global distance scale
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Scaled `[min, max)` range of a level
    pub fn band(&self, level: u8) -> (f32, f32) {
        let (min, max) = self.config.band(level as usize);
        (min * self.scale, max * self.scale)
    }

    /// Plain band lookup, no hysteresis
    pub fn select_level(&self, distance: f32) -> u8 {
        let scaled = distance / self.scale;
        self.config
            .boundaries
            .iter()
            .position(|&boundary| scaled < boundary)
            .unwrap_or(self.config.boundaries.len()) as u8
    }

    /// Level for `distance` given the current level.
    ///
    /// The current band is widened downward by the hysteresis margin, so a
    /// node that just moved out past a boundary has to come back by more than
    /// the margin before it returns to the finer level. When the distance
    /// leaves the widened band, the plain lookup decides, including jumps
    /// across several bands. The margin scales with the bands so the dead
    /// zone keeps its share of a band after a rescale.
    pub fn next_level(&self, current: Option<u8>, distance: f32) -> u8 {
        if let Some(level) = current {
            let (min, max) = self.band(level);
            let lower = if level == 0 { min } else { min - self.config.hysteresis * self.scale };
            if distance >= lower && distance < max {
                return level;
            }
        }
        self.select_level(distance)
    }

    /// Evaluate one node at `distance`, advancing its transition by `dt` seconds
    pub fn evaluate(&mut self, id: &NodeId, distance: f32, dt: f32) -> LodState {
        let current = self.states.get(id).copied();
        let level = self.next_level(current.map(|s| s.level), distance);
        let state = match current {
            None => LodState { level, progress: 1.0, distance },
            Some(previous) if previous.level != level => {
                log::trace!("Node {} lod {} -> {} at {:.1}", id, previous.level, level, distance);
                LodState { level, progress: 0.0, distance }
            }
            Some(previous) => LodState {
                level,
                progress: (previous.progress + self.config.transition_rate * dt).min(1.0),
                distance,
            },
        };
        self.states.insert(id.clone(), state);
        state
    }

    /// Evaluate every visible node and drop state for the rest
    ///
    /// # Arguments
    /// * `graph` - Snapshot the indices refer to
    /// * `visible` - Indices into `graph.nodes()`
    /// * `camera_position` - Eye position for distances
    /// * `dt` - Seconds since the previous update
    pub fn update(&mut self, graph: &GraphSnapshot, visible: &[u32], camera_position: Vec3, dt: f32) -> LodUpdate {
        let nodes = graph.nodes();
        let distance_of = |&i: &u32| nodes[i as usize].position.distance(camera_position);
        let distances: Vec<f32> = if visible.len() >= PARALLEL_THRESHOLD {
            visible.par_iter().map(distance_of).collect()
        } else {
            visible.iter().map(distance_of).collect()
        };

        let mut stats = LodUpdate { evaluated: visible.len(), ..Default::default() };
        let mut seen: HashMap<NodeId, LodState> = HashMap::with_capacity(visible.len());
        for (&i, &distance) in visible.iter().zip(&distances) {
            let id = &nodes[i as usize].id;
            let before = self.states.get(id).map(|s| s.level);
            let state = self.evaluate(id, distance, dt);
            match before {
                None => stats.created += 1,
                Some(level) if level != state.level => stats.changed += 1,
                Some(_) => {}
            }
            seen.insert(id.clone(), state);
        }

        stats.removed = self.states.len() - seen.len();
        self.states = seen;
        stats
    }

    pub fn state(&self, id: &NodeId) -> Option<&LodState> {
        self.states.get(id)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Number of tracked nodes at each level
    pub fn distribution(&self) -> Vec<usize> {
        let mut counts = vec![0; self.level_count()];
        for state in self.states.values() {
            counts[state.level as usize] += 1;
        }
        counts
    }

    /// Multiply the global scale by `factor`, at most once per cooldown.
    ///
    /// Returns whether the scale changed. Redundant requests inside the
    /// cooldown are ignored.
    pub fn rescale(&mut self, factor: f32, now: Instant) -> bool {
        if !(factor > 0.0 && factor <= 1.0) {
            log::warn!("Ignoring lod rescale factor {}", factor);
            return false;
        }
        if let Some(last) = self.last_rescale {
            if now.saturating_duration_since(last) < self.config.scale_cooldown {
                log::debug!("Lod rescale ignored, cooldown active");
                return false;
            }
        }
        let scale = (self.scale * factor).max(self.config.min_scale);
        if scale == self.scale {
            return false;
        }
        log::info!("Lod distance scale {:.3} -> {:.3}", self.scale, scale);
        self.scale = scale;
        self.last_rescale = Some(now);
        true
    }

    /// Set the scale directly, clamped to `[min_scale, 1]`
    pub fn set_scale(&mut self, scale: f32) -> f32 {
        self.scale = if scale.is_finite() {
            scale.clamp(self.config.min_scale, 1.0)
        } else {
            1.0
        };
        self.scale
    }

    pub fn reset_scale(&mut self) {
        self.scale = 1.0;
        self.last_rescale = None;
    }
}

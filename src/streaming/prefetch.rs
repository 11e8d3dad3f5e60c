//! Camera trajectory prediction for prefetching chunks.

use std::collections::VecDeque;
use std::time::Instant;

use crate::core::types::Vec3;

/// Samples kept, roughly one second at 60 updates per second
const MAX_HISTORY: usize = 60;

/// Sample of camera position and time.
#[derive(Clone, Copy, Debug)]
struct PositionSample {
    position: Vec3,
    time: Instant,
}

/// Estimates camera velocity from its recent positions.
#[derive(Debug, Clone)]
pub struct PrefetchPredictor {
    history: VecDeque<PositionSample>,
    velocity: Vec3,
}

impl Default for PrefetchPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefetchPredictor {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_HISTORY),
            velocity: Vec3::ZERO,
        }
    }

    /// Record a camera position.
    pub fn record(&mut self, position: Vec3, now: Instant) {
        if !position.is_finite() {
            return;
        }
        self.history.push_back(PositionSample { position, time: now });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        self.velocity = self.estimate_velocity();
    }

    /// Weighted average of per-sample velocities, recent samples count more.
    fn estimate_velocity(&self) -> Vec3 {
        let mut total_velocity = Vec3::ZERO;
        let mut total_weight = 0.0;
        let count = self.history.len() as f32;

        for (i, (prev, curr)) in self.history.iter().zip(self.history.iter().skip(1)).enumerate() {
            let dt = curr.time.saturating_duration_since(prev.time).as_secs_f32();
            if dt > 0.0001 {
                let weight = (i + 1) as f32 / count;
                total_velocity += (curr.position - prev.position) / dt * weight;
                total_weight += weight;
            }
        }

        if total_weight > 0.0 {
            total_velocity / total_weight
        } else {
            Vec3::ZERO
        }
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    /// Position `seconds_ahead` along the current velocity.
    pub fn predict_position(&self, seconds_ahead: f32) -> Option<Vec3> {
        self.history
            .back()
            .map(|latest| latest.position + self.velocity * seconds_ahead)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.velocity = Vec3::ZERO;
    }
}

/// Predicted point for a camera, `None` when moving slower than `min_speed`
pub fn predict_point(position: Vec3, velocity: Vec3, min_speed: f32, lookahead: f32) -> Option<Vec3> {
    let speed = velocity.length();
    (speed.is_finite() && speed > min_speed).then(|| position + velocity * lookahead)
}

//! Streaming configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// How failed chunk loads are retried
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts before a chunk is abandoned
    pub max_attempts: u32,
    /// Delay after the first failure, doubled on each further failure
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failures
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exponent)
    }
}

/// Progressive loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Edge length of a chunk cell in world units
    pub chunk_size: f32,
    /// Chunks whose center is further than this are never requested
    pub view_distance: f32,
    pub immediate_radius: f32,
    pub high_radius: f32,
    pub medium_radius: f32,
    /// Byte budget of the loaded-chunk cache
    pub cache_budget_bytes: usize,
    /// Chunks not accessed for this long are evicted
    pub entry_ttl: Duration,
    /// Maximum in-flight requests
    pub max_concurrent: usize,
    /// Node cap passed to the data source per chunk
    pub max_nodes_per_chunk: usize,
    pub prediction_enabled: bool,
    /// Camera speed (units/s) below which no prediction is made
    pub min_prediction_speed: f32,
    /// Seconds of travel the predicted point lies ahead
    pub prediction_lookahead: f32,
    /// Bandwidth (bytes/s) below which low-priority requests get cancelled
    pub low_bandwidth_threshold: f64,
    /// Consecutive low-bandwidth updates before cancelling
    pub low_bandwidth_updates: u32,
    pub retry: RetryPolicy,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100.0,
            view_distance: 500.0,
            immediate_radius: 150.0,
            high_radius: 300.0,
            medium_radius: 450.0,
            cache_budget_bytes: 64 * 1024 * 1024,
            entry_ttl: Duration::from_secs(300),
            max_concurrent: 4,
            max_nodes_per_chunk: 5000,
            prediction_enabled: true,
            min_prediction_speed: 1.0,
            prediction_lookahead: 2.0,
            low_bandwidth_threshold: 64.0 * 1024.0,
            low_bandwidth_updates: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(Error::config(format!("chunk size must be positive, got {}", self.chunk_size)));
        }
        let radii = [self.immediate_radius, self.high_radius, self.medium_radius, self.view_distance];
        if radii.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(Error::config(format!("streaming radii must be positive, got {radii:?}")));
        }
        if radii.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::config(format!(
                "streaming radii must satisfy immediate <= high <= medium <= view distance, got {radii:?}"
            )));
        }
        if self.cache_budget_bytes == 0 {
            return Err(Error::config("cache budget must be non-zero"));
        }
        if self.max_concurrent == 0 {
            return Err(Error::config("max concurrent loads must be non-zero"));
        }
        if self.max_nodes_per_chunk == 0 {
            return Err(Error::config("max nodes per chunk must be non-zero"));
        }
        if self.min_prediction_speed < 0.0 || self.prediction_lookahead < 0.0 {
            return Err(Error::config("prediction speed and lookahead must be non-negative"));
        }
        if self.low_bandwidth_threshold < 0.0 {
            return Err(Error::config("low bandwidth threshold must be non-negative"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry policy needs at least one attempt"));
        }
        Ok(())
    }
}

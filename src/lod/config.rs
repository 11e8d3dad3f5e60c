//! Distance bands for level-of-detail selection

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Default band boundaries: `[0,100), [100,400), [400,1000), [1000,inf)`
pub const DEFAULT_BOUNDARIES: [f32; 3] = [100.0, 400.0, 1000.0];

/// Configuration for LOD selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Upper distance of every band except the last, strictly increasing.
    /// `n` boundaries give `n + 1` levels; the last band is unbounded.
    pub boundaries: Vec<f32>,
    /// Dead zone below each boundary, in world units
    pub hysteresis: f32,
    /// Transition progress gained per second after a level change
    pub transition_rate: f32,
    /// Minimum time between two global rescales
    pub scale_cooldown: Duration,
    /// Floor for the global distance scale
    pub min_scale: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            boundaries: DEFAULT_BOUNDARIES.to_vec(),
            hysteresis: 10.0,
            transition_rate: 4.0,
            scale_cooldown: Duration::from_secs(5),
            min_scale: 0.25,
        }
    }
}

impl LodConfig {
    /// Number of discrete levels
    pub fn level_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    /// Unscaled `[min, max)` range of a level
    ///
    /// # Examples
    /// ```
    /// use vistagraph::lod::LodConfig;
    ///
    /// let config = LodConfig::default();
    /// assert_eq!(config.band(0), (0.0, 100.0));
    /// assert_eq!(config.band(2), (400.0, 1000.0));
    /// assert_eq!(config.band(3), (1000.0, f32::INFINITY));
    /// ```
    pub fn band(&self, level: usize) -> (f32, f32) {
        let min = if level == 0 { 0.0 } else { self.boundaries[level - 1] };
        let max = self.boundaries.get(level).copied().unwrap_or(f32::INFINITY);
        (min, max)
    }

    /// Reject unusable settings before anything is constructed
    pub fn validate(&self) -> Result<()> {
        let mut previous = 0.0f32;
        for &boundary in &self.boundaries {
            if !boundary.is_finite() || boundary <= previous {
                return Err(Error::config(format!(
                    "lod boundaries must be positive, finite and strictly increasing, got {:?}",
                    self.boundaries
                )));
            }
            previous = boundary;
        }
        if self.level_count() > u8::MAX as usize {
            return Err(Error::config("too many lod levels"));
        }
        if !self.hysteresis.is_finite() || self.hysteresis < 0.0 {
            return Err(Error::config(format!("lod hysteresis must be >= 0, got {}", self.hysteresis)));
        }
        if !self.transition_rate.is_finite() || self.transition_rate <= 0.0 {
            return Err(Error::config(format!(
                "lod transition rate must be > 0, got {}",
                self.transition_rate
            )));
        }
        if !(self.min_scale > 0.0 && self.min_scale <= 1.0) {
            return Err(Error::config(format!("lod min scale must be in (0, 1], got {}", self.min_scale)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = LodConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.level_count(), 4);
    }

    #[test]
    fn test_rejects_bad_boundaries() {
        let mut config = LodConfig::default();
        config.boundaries = vec![100.0, 50.0];
        assert!(config.validate().is_err());
        config.boundaries = vec![-1.0];
        assert!(config.validate().is_err());
        config.boundaries = vec![f32::NAN];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_hysteresis() {
        let config = LodConfig { hysteresis: -1.0, ..Default::default() };
        assert!(config.validate().unwrap_err().is_fatal());
    }

    #[test]
    fn test_single_level() {
        let config = LodConfig { boundaries: Vec::new(), ..Default::default() };
        assert!(config.validate().is_ok());
        assert_eq!(config.band(0), (0.0, f32::INFINITY));
    }
}

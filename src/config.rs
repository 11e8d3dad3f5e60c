//! Aggregated configuration for [`crate::engine::GraphCore`]

use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::lod::LodConfig;
use crate::perf::PerfConfig;
use crate::render::{CullingConfig, InstanceConfig};
use crate::streaming::StreamingConfig;

/// Every tunable of the core, with defaults
///
/// The core reads no files itself; hosts deserialize this from whatever
/// format they own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub culling: CullingConfig,
    pub lod: LodConfig,
    pub instances: InstanceConfig,
    pub streaming: StreamingConfig,
    pub perf: PerfConfig,
}

impl CoreConfig {
    /// Validate every section, first failure wins
    pub fn validate(&self) -> Result<()> {
        self.culling.validate()?;
        self.lod.validate()?;
        self.instances.validate()?;
        self.streaming.validate()?;
        self.perf.validate()?;
        Ok(())
    }

    /// Parse from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| crate::core::Error::config(format!("invalid core config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CoreConfig::from_json(r#"{"streaming": {"max_concurrent": 6}, "lod": {"hysteresis": 5.0}}"#).unwrap();
        assert_eq!(config.streaming.max_concurrent, 6);
        assert_eq!(config.streaming.chunk_size, 100.0);
        assert_eq!(config.lod.hysteresis, 5.0);
        assert_eq!(config.perf, PerfConfig::default());
    }

    #[test]
    fn test_invalid_section_is_fatal() {
        let err = CoreConfig::from_json(r#"{"streaming": {"max_concurrent": 0}}"#).unwrap_err();
        assert!(err.is_fatal());
        let err = CoreConfig::from_json("not json").unwrap_err();
        assert!(err.is_fatal());
    }
}

//! Runtime configuration
//!
//! Loaded from `esengine.toml` when present. Every key is optional:
//!
//! ```toml
//! max_delta = 0.1
//! fixed_timestep = 0.016666668
//! max_fixed_steps = 8
//! query_buffer_pool = 32
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EcsError, Result};

/// Runtime configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on a frame's delta time, in seconds
    pub max_delta: f32,
    /// Seconds per fixed step
    pub fixed_timestep: f32,
    /// Fixed steps allowed per frame before the accumulator is dropped
    pub max_fixed_steps: u32,
    /// Query result buffers kept for reuse
    pub query_buffer_pool: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_delta: 0.1,
            fixed_timestep: 1.0 / 60.0,
            max_fixed_steps: 8,
            query_buffer_pool: 32,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EcsError::Configuration(format!("invalid runtime config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load `esengine.toml` from a directory, falling back to defaults
    pub fn load_from_dir(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join("esengine.toml");
        if !path.exists() {
            tracing::debug!("No esengine.toml in {}, using defaults", dir.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize runtime config")
    }

    /// Reject timings that would stall or panic the frame driver
    pub fn validate(&self) -> Result<()> {
        if !(self.fixed_timestep > 0.0) {
            return Err(EcsError::Configuration(format!(
                "fixed_timestep must be positive, got {}",
                self.fixed_timestep
            )));
        }
        if !(self.max_delta > 0.0) {
            return Err(EcsError::Configuration(format!(
                "max_delta must be positive, got {}",
                self.max_delta
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("max_fixed_steps = 2").unwrap();
        assert_eq!(config.max_fixed_steps, 2);
        assert_eq!(config.max_delta, RuntimeConfig::default().max_delta);
    }

    #[test]
    fn test_invalid_timestep_is_rejected() {
        let err = RuntimeConfig::from_toml_str("fixed_timestep = 0.0").unwrap_err();
        assert!(matches!(err, EcsError::Configuration(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RuntimeConfig {
            query_buffer_pool: 4,
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(RuntimeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = std::env::temp_dir().join("esengine_runtime_config_missing");
        let config = RuntimeConfig::load_from_dir(&dir).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }
}

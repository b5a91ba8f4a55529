//! Rack Configuration
//!
//! Sample rate, output sink sizing and engine thread settings. Every field
//! has a default, so a configuration file only needs the values it
//! changes. TOML loading requires the `config` feature.

use serde::{Deserialize, Serialize};

#[cfg(feature = "config")]
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RackConfig {
    pub sample_rate: f64,
    pub sink: SinkConfig,
    pub engine: EngineConfig,
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::module::DEFAULT_SAMPLE_RATE,
            sink: SinkConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// PCM sink buffering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Total latency of the hardware queue in milliseconds
    pub latency_ms: u32,
    /// Number of hardware buffer slots
    pub buffer_count: usize,
    /// Interleaved output channels, 1 or 2
    pub channels: u16,
}

impl SinkConfig {
    /// Interleaved samples per submitted buffer
    pub fn buffer_samples(&self, sample_rate: f64) -> usize {
        let count = self.buffer_count.max(1) as f64;
        let frames = (sample_rate / 1000.0 * f64::from(self.latency_ms) / count).floor();
        (frames as usize).max(1) * usize::from(self.channels.clamp(1, 2))
    }

    /// Playback time covered by one buffer, in milliseconds
    pub fn buffer_ms(&self) -> f64 {
        f64::from(self.latency_ms) / self.buffer_count.max(1) as f64
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            latency_ms: 60,
            buffer_count: 8,
            channels: 2,
        }
    }
}

/// Real-time thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_name: "voltrack-audio".to_string(),
        }
    }
}

/// Errors raised while loading a configuration
#[cfg(feature = "config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(feature = "config")]
impl RackConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

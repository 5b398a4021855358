//! Engine configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rubric_core::CapabilityTree;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Retry policy for capability calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,

    /// Pause between attempts, e.g. "10s" or "500ms"
    #[serde(with = "duration_str")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(10),
        }
    }
}

/// Settings for an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prompts per capability call
    pub batch_size: usize,

    /// Round budget, including the initial round
    pub rounds: usize,

    /// Batch calls allowed in flight at once
    pub max_concurrent_batches: usize,

    /// Directory for round snapshots
    pub output_dir: PathBuf,

    /// Retry policy wrapped around every capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Hierarchy for statistics rollups; the built-in tree when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_tree: Option<CapabilityTree>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            rounds: 2,
            max_concurrent_batches: 1,
            output_dir: PathBuf::from("evaluation_results"),
            retry: None,
            capability_tree: None,
        }
    }
}

impl EngineConfig {
    /// Parse a config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.rounds == 0 {
            return Err(ConfigError::Invalid("rounds must be at least 1".into()));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::Invalid("max_concurrent_batches must be at least 1".into()));
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// The configured capability tree, or the built-in one.
    pub fn tree(&self) -> CapabilityTree {
        self.capability_tree.clone().unwrap_or_default()
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, max_concurrent_batches: usize) -> Self {
        self.max_concurrent_batches = max_concurrent_batches;
        self
    }
}

mod duration_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}

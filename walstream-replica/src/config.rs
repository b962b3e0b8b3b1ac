//! Replica configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via WALSTREAM_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Replica configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Human-readable replica label. Defaults to the replica type.
    pub name: Option<String>,
    /// Maximum age of the oldest retained snapshot in seconds. Once all
    /// snapshots are older, a fresh snapshot is forced and everything
    /// below it is pruned.
    pub retention_interval_secs: u64,
    /// When false, the replica takes no background activity of its own
    /// and the caller drives `sync` and `enforce_retention` directly.
    pub monitor_enabled: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            name: None,
            retention_interval_secs: crate::DEFAULT_RETENTION_INTERVAL.as_secs(),
            monitor_enabled: true,
        }
    }
}

impl ReplicaConfig {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("WALSTREAM_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: ReplicaConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("WALSTREAM_REPLICA_NAME") {
            if !name.is_empty() {
                self.name = Some(name);
            }
        }

        if let Ok(secs) = std::env::var("WALSTREAM_RETENTION_INTERVAL") {
            if let Ok(n) = secs.parse() {
                self.retention_interval_secs = n;
            }
        }

        if let Ok(enabled) = std::env::var("WALSTREAM_MONITOR_ENABLED") {
            self.monitor_enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
    }

    /// Returns the retention interval as a Duration.
    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

//! Sync Configuration
//!
//! Loaded from TOML; every field has a default so partial files are fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Settings shared by clients and sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Name reported in session delivery errors
    pub session_name: String,

    /// Capacity of each proxy event channel
    pub event_capacity: usize,

    /// Capacity of each proxy mutation channel
    pub mutation_capacity: usize,

    /// Default tracing filter for binaries
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            session_name: String::new(),
            event_capacity: 64,
            mutation_capacity: 256,
            log_filter: "struct_sync=info".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded sync config");
        Ok(config)
    }

    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = SyncConfig::from_toml_str("session_name = \"edge\"").unwrap();
        assert_eq!(config.session_name, "edge");
        assert_eq!(config.mutation_capacity, SyncConfig::default().mutation_capacity);
    }

    #[test]
    fn test_invalid_config() {
        let err = SyncConfig::from_toml_str("event_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "event_capacity = 8\nlog_filter = \"debug\"\n").unwrap();

        let config = SyncConfig::load(&path).await.unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.log_filter, "debug");

        let missing = SyncConfig::load(dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }
}

//! Sync configuration (TOML).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::projection::ReconcilePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How the store learns about remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Subscribe to the change feed; poll only if the feed is unavailable.
    Realtime,
    /// Never subscribe; refetch on a fixed interval.
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub mode: SyncMode,

    /// Fallback refetch interval.
    pub poll_interval_ms: u64,

    /// Upper bound for one bulk fetch before it counts as a network failure.
    pub fetch_timeout_ms: u64,

    pub reconcile: ReconcilePolicy,

    /// Capacity of the store's command channel.
    pub command_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Realtime,
            poll_interval_ms: 5_000,
            fetch_timeout_ms: 5_000,
            reconcile: ReconcilePolicy::LastWriteWins,
            command_buffer: 64,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be > 0".into()));
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::Invalid("command_buffer must be > 0".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_behaviour() {
        let config = SyncConfig::default();
        assert_eq!(config.mode, SyncMode::Realtime);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.reconcile, ReconcilePolicy::LastWriteWins);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn parses_partial_toml() {
        let config = SyncConfig::from_toml_str(
            r#"
            mode = "polling"
            poll_interval_ms = 250
            reconcile = "highest_status"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, SyncMode::Polling);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.reconcile, ReconcilePolicy::HighestStatus);
        assert_eq!(config.fetch_timeout_ms, 5_000);
    }

    #[test]
    fn rejects_zero_interval() {
        let err = SyncConfig::from_toml_str("poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = SyncConfig::from_toml_str(r#"mode = "carrier_pigeon""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SyncConfig::load("/definitely/not/here/agente.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

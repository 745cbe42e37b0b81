//! Configuration for gazecast.
//!
//! The core treats persisted configuration as an opaque blob: it is loaded
//! once at startup, handed to the filter and link constructors, and saved
//! back on exit with the last-used role.

use crate::core::FilterConfig;
use crate::net::{ClientRole, LinkConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fixation filter constants, applied when a capture session starts
    pub filter: FilterConfig,

    /// Relay target and role
    pub link: LinkConfig,

    /// Path for storing session statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gazecast");

        Self {
            filter: FilterConfig::default(),
            link: LinkConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        // A hand-edited file must not smuggle in constants the filter rejects.
        config.filter.validate()?;
        Ok(config)
    }

    /// Load configuration for a run that saves it back on exit.
    ///
    /// Falls back to defaults when the file is unusable; the flag is false
    /// then, and the file must not be overwritten.
    pub fn load_or_default() -> (Self, bool) {
        Self::load_or_default_from(&Self::config_path())
    }

    pub fn load_or_default_from(path: &Path) -> (Self, bool) {
        match Self::load_from(path) {
            Ok(config) => (config, true),
            Err(e) => {
                warn!(
                    "Could not load configuration from {}, using defaults: {e}",
                    path.display()
                );
                (Self::default(), false)
            }
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gazecast")
            .join("config.json")
    }

    /// Path of the log of past sessions.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("sessions.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Replace the filter constants.
    ///
    /// Invalid constants are rejected and the previous values stay in effect.
    pub fn set_filter(&mut self, filter: FilterConfig) -> Result<(), ConfigError> {
        filter.validate()?;
        self.filter = filter;
        Ok(())
    }

    /// Replace the relay target and role.
    pub fn set_link(
        &mut self,
        host: impl Into<String>,
        port: u16,
        role: ClientRole,
    ) -> Result<(), ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidLink("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(ConfigError::InvalidLink("port must be non-zero".to_string()));
        }
        if role.is_empty() {
            return Err(ConfigError::InvalidLink(
                "role must include source or sink".to_string(),
            ));
        }

        self.link.host = host;
        self.link.port = port;
        self.link.role = role;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid filter configuration: {0}")]
    InvalidFilter(String),
    #[error("Invalid link configuration: {0}")]
    InvalidLink(String),
    #[error("Filter constants cannot change while capture is running")]
    CaptureActive,
}

/// Serde support for Duration, stored as whole milliseconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_file_is_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let (_, writable) = Config::load_or_default_from(&path);
        assert!(writable, "a missing file may be created");

        std::fs::write(&path, "{ not json").unwrap();
        let (config, writable) = Config::load_or_default_from(&path);
        assert!(!writable);
        assert_eq!(config.filter, FilterConfig::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");

        Config::default().save_to(&path).unwrap();
        assert!(Config::load_or_default_from(&path).1);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.filter.validate().is_ok());
        assert!(config.link.role.includes_source());
        assert!(config.link.role.includes_sink());
        assert!(config.data_path.ends_with("gazecast"));
    }

    #[test]
    fn test_invalid_filter_keeps_previous() {
        let mut config = Config::default();
        let before = config.filter.clone();

        let bad = FilterConfig {
            low_time_constant: 20,
            high_time_constant: 4,
            ..before.clone()
        };
        assert!(matches!(
            config.set_filter(bad),
            Err(ConfigError::InvalidFilter(_))
        ));
        assert_eq!(config.filter, before);

        let zero = FilterConfig {
            window_size: 0,
            ..before.clone()
        };
        assert!(config.set_filter(zero).is_err());
        assert_eq!(config.filter, before);
    }

    #[test]
    fn test_set_link_validation() {
        let mut config = Config::default();
        assert!(config.set_link("", 7455, ClientRole::SOURCE).is_err());
        assert!(config.set_link("relay.lan", 0, ClientRole::SOURCE).is_err());
        assert!(config
            .set_link("relay.lan", 7455, ClientRole::from_csv("nobody"))
            .is_err());

        config.set_link("relay.lan", 9000, ClientRole::SINK).unwrap();
        assert_eq!(config.link.host, "relay.lan");
        assert_eq!(config.link.port, 9000);
        assert_eq!(config.link.role, ClientRole::SINK);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.set_link("10.0.0.7", 7460, ClientRole::SINK).unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.link.host, "10.0.0.7");
        assert_eq!(loaded.link.port, 7460);
        assert_eq!(loaded.link.role, ClientRole::SINK);
        assert_eq!(loaded.link.connect_timeout, config.link.connect_timeout);
        assert_eq!(loaded.filter, config.filter);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.link.port, LinkConfig::default().port);
    }

    #[test]
    fn test_load_rejects_invalid_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut value = serde_json::to_value(Config::default()).unwrap();
        value["filter"]["fixation_threshold"] = serde_json::json!(0);
        std::fs::write(&path, value.to_string()).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::InvalidFilter(_))
        ));
    }
}

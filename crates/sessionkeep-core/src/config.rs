//! Application configuration management.
//!
//! Configuration is stored at `~/.config/sessionkeep/config.json`. A missing
//! file yields defaults; environment variables override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "SESSIONKEEP_API_URL";
pub const ENV_DATA_DIR: &str = "SESSIONKEEP_DATA_DIR";

const DEFAULT_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub bootstrap_timeout_secs: u64,
    pub expiry_skew_secs: i64,
    pub storage: StorageKind,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: 30,
            refresh_timeout_secs: 15,
            bootstrap_timeout_secs: 20,
            expiry_skew_secs: DEFAULT_EXPIRY_SKEW_SECS,
            storage: StorageKind::File,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_API_URL).ok(),
            std::env::var(ENV_DATA_DIR).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, data_dir: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(dir) = data_dir.filter(|d| !d.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Directory holding persisted session data and logs.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDirectory("data"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    /// Out-of-range values fall back to the default skew.
    pub fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.expiry_skew_secs).unwrap_or_else(|| {
            warn!(
                expiry_skew_secs = self.expiry_skew_secs,
                "Expiry skew out of range, using default"
            );
            chrono::Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.storage, StorageKind::File);
        assert!(config.bootstrap_timeout() > config.refresh_timeout());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url": "https://auth.example.com", "storage": "keyring"}"#)
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_base_url, "https://auth.example.com");
        assert_eq!(config.storage, StorageKind::Keyring);
        assert_eq!(config.expiry_skew_secs, 60);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/sessionkeep")),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.data_dir, Some(PathBuf::from("/tmp/sessionkeep")));
        assert_eq!(loaded.data_dir().unwrap(), PathBuf::from("/tmp/sessionkeep"));
    }

    #[test]
    fn test_out_of_range_skew_uses_default() {
        let config: Config = serde_json::from_str(&format!(r#"{{"expiry_skew_secs": {}}}"#, i64::MAX)).unwrap();
        assert_eq!(config.expiry_skew(), chrono::Duration::seconds(60));

        let config = Config {
            expiry_skew_secs: 300,
            ..Config::default()
        };
        assert_eq!(config.expiry_skew(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(Some("https://override.example.com".into()), Some("  ".into()));
        assert_eq!(config.api_base_url, "https://override.example.com");
        assert!(config.data_dir.is_none());
    }
}

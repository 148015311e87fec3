//! Settings from `~/.config/designtimes/config.toml`: app name, storage file
//! location, quota and retention limits, backup directory.
//!
//! Every key is optional. Keys that match no field are logged and ignored.
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::StorageLimits;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value in config file: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for backup file names.
    pub app_name: String,

    /// Storage file location. Relative paths resolve against the config dir;
    /// unset means `storage.json` in the config dir.
    pub data_file: Option<PathBuf>,

    /// Assumed storage ceiling used for admission checks and reports.
    pub quota_bytes: u64,

    /// Hard capacity enforced by the storage file itself (unset = unlimited).
    pub hard_limit_bytes: Option<u64>,

    /// Contact messages kept when cleanup runs.
    pub message_retention: usize,

    /// Remaining bytes below which `info` warns that storage is nearly full.
    pub near_limit_bytes: u64,

    /// Default directory for exported backups (unset = current directory).
    pub backup_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "thedesigntimes".to_string(),
            data_file: None,
            quota_bytes: StorageLimits::DEFAULT_QUOTA_BYTES,
            hard_limit_bytes: None,
            message_retention: StorageLimits::DEFAULT_MESSAGE_RETENTION,
            near_limit_bytes: StorageLimits::DEFAULT_NEAR_LIMIT_BYTES,
            backup_dir: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero `quota_bytes` or `hard_limit_bytes` → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = read_capped(path, Self::MAX_FILE_SIZE)? else {
            tracing::debug!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        };
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let table: toml::Table = content.parse()?;
        let known = Self::known_keys();
        for key in table.keys().filter(|k| !known.contains(*k)) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), quota_bytes = config.quota_bytes, "Loaded configuration");
        Ok(config)
    }

    /// Field names as they appear in the file.
    fn known_keys() -> Vec<String> {
        match serde_json::to_value(Self::default()) {
            Ok(serde_json::Value::Object(fields)) => fields.into_iter().map(|(k, _)| k).collect(),
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.quota_bytes == 0 {
            return Err(ConfigError::Invalid("quota_bytes must be greater than 0".to_string()));
        }
        if self.hard_limit_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "hard_limit_bytes must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage limits derived from this config.
    pub fn limits(&self) -> StorageLimits {
        StorageLimits {
            quota_bytes: self.quota_bytes,
            message_retention: self.message_retention,
            near_limit_bytes: self.near_limit_bytes,
        }
    }

    /// Resolve the storage file path against `config_dir`.
    pub fn data_path(&self, config_dir: &Path) -> PathBuf {
        match &self.data_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => config_dir.join(path),
            None => config_dir.join("storage.json"),
        }
    }
}

/// Read at most `max` bytes of `path`; `None` if the file does not exist.
fn read_capped(path: &Path, max: u64) -> Result<Option<String>, ConfigError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let mut content = String::new();
    file.take(max + 1).read_to_string(&mut content)?;
    if content.len() as u64 > max {
        return Err(ConfigError::TooLarge(format!(
            "Config file exceeds {max} bytes"
        )));
    }
    Ok(Some(content))
}

// ============================================================================
// Tests
// ============================================================================

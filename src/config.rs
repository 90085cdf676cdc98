//! Runtime configuration.
//!
//! All sections default sensibly, so an empty JSON object (or no config at
//! all) is valid:
//!
//! ```
//! use anchored::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{ "anchors": { "segment_capacity": 256 } }"#).unwrap();
//! assert_eq!(config.anchors.segment_capacity, 256);
//! assert_eq!(config.workers.name_prefix, "anchored-worker");
//! ```

use core::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Environment variable naming a JSON config file for [`RuntimeConfig::from_env`].
pub const CONFIG_ENV: &str = "ANCHORED_CONFIG";

const MAX_SEGMENT_CAPACITY: u32 = 1 << 16;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Anchor table settings.
    pub anchors: AnchorConfig,
    /// Worker thread settings.
    pub workers: WorkerConfig,
}

/// Anchor table settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Slots in the first segment; each further segment doubles. Must be a
    /// power of two no larger than 65536.
    pub segment_capacity: u32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        AnchorConfig {
            segment_capacity: 64,
        }
    }
}

impl AnchorConfig {
    /// Checks the invariants the anchor table relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.segment_capacity;
        if !capacity.is_power_of_two() || capacity > MAX_SEGMENT_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "anchors.segment_capacity must be a power of two in 1..={MAX_SEGMENT_CAPACITY}, got {capacity}"
            )));
        }
        Ok(())
    }
}

/// Worker thread settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Thread name prefix; a sequence number is appended.
    pub name_prefix: String,
    /// Stack size in bytes, or the platform default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name_prefix: String::from("anchored-worker"),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    /// Checks the worker settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name_prefix.contains('\0') {
            return Err(ConfigError::Invalid(String::from(
                "workers.name_prefix must not contain NUL bytes",
            )));
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::Invalid(String::from(
                "workers.stack_size must be non-zero",
            )));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Loads the file named by `ANCHORED_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(RuntimeConfig::default()),
        }
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anchors.validate()?;
        self.workers.validate()
    }
}

/// Configuration failures.
#[derive(Debug)]
pub enum ConfigError {
    /// The document is not valid JSON for [`RuntimeConfig`].
    Json(serde_json::Error),
    /// The config file could not be read.
    Io(std::io::Error),
    /// A value is out of range.
    Invalid(String),
    /// [`crate::init`] ran after the global table was already in use.
    AlreadyInitialized,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Json(err) => write!(f, "invalid configuration: {err}"),
            ConfigError::Io(err) => write!(f, "cannot read configuration: {err}"),
            ConfigError::Invalid(msg) => f.write_str(msg),
            ConfigError::AlreadyInitialized => f.write_str("anchor table already initialized"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Json(err) => Some(err),
            ConfigError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

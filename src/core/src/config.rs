use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KilnError, Result};

/// Kiln configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Local file store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl KilnConfig {
    /// Load configuration from a YAML (`.yaml`, `.yml`) or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            KilnError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data)?,
            Some("json") => serde_json::from_str(&data)?,
            other => {
                return Err(KilnError::ConfigError(format!(
                    "unsupported config format {:?} (expected yaml, yml or json)",
                    other.unwrap_or("")
                )))
            }
        };
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per blob state
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Maximum number of layer tarballs kept in the cache state
    #[serde(default = "default_layer_cache_size")]
    pub layer_cache_size: usize,

    /// Maximum number of manifests kept in the cache state
    #[serde(default = "default_manifest_cache_size")]
    pub manifest_cache_size: usize,

    /// Idle/expiry policy for cached layers
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            layer_cache_size: default_layer_cache_size(),
            manifest_cache_size: default_manifest_cache_size(),
            cleanup: CleanupConfig::default(),
        }
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".kiln"))
        .unwrap_or_else(|| PathBuf::from(".kiln"))
        .join("storage")
}

fn default_layer_cache_size() -> usize {
    256
}

fn default_manifest_cache_size() -> usize {
    16
}

/// Cleanup configuration for cached layers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Delete files not accessed for this many seconds
    pub tti_secs: u64,

    /// Delete files older than this many seconds (0 = never)
    pub ttl_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            tti_secs: 7 * 24 * 3600, // 1 week
            ttl_secs: 0,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

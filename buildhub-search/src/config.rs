//! Service configuration
//!
//! Loaded from a TOML file; every section and field has a default, so an
//! empty file is a valid configuration.

use crate::query::SearchLimits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchLimits,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum request body size in bytes (default: 1MiB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Which store answers searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Elasticsearch,
    /// In-process store, for development
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elasticsearch" | "es" => Ok(Self::Elasticsearch),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid(format!(
                "unknown store backend '{other}' (expected elasticsearch or memory)"
            ))),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elasticsearch => "elasticsearch",
            Self::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_store_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index() -> String {
    "buildhub2".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            index: default_index(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// EnvFilter directives; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,buildhub_search=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load config from file path, or create default
    ///
    /// A default config that could not be written is still returned, along
    /// with the write failure for the caller to report once logging is up.
    pub fn load_or_create(config_path: &Path) -> Result<(Self, Option<ConfigError>), ConfigError> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            Ok((Self::from_toml_str(&content)?, None))
        } else {
            let config = Config::default();
            let save_error = config.save(config_path).err();
            Ok((config, save_error))
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.max_search_size == 0 {
            return Err(ConfigError::Invalid("search.max_search_size must be positive".into()));
        }
        if self.store.index.trim().is_empty() {
            return Err(ConfigError::Invalid("store.index must not be empty".into()));
        }
        if self.store.backend == StoreBackend::Elasticsearch {
            Url::parse(&self.store.url)
                .map_err(|e| ConfigError::Invalid(format!("store.url '{}': {e}", self.store.url)))?;
        }
        match self.observability.log_format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "observability.log_format must be pretty or json, got '{other}'"
            ))),
        }
    }
}

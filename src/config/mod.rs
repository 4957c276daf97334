//! Runtime Configuration
//!
//! Configuration for the plugin runtime from `.env` files, environment
//! variables and YAML files. Priority: environment variables > YAML values >
//! defaults.
//!
//! # Example
//! ```rust,no_run
//! use anima_runtime::config::RuntimeConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Environment variables only
//! let config = RuntimeConfig::from_env()?;
//!
//! // YAML file with environment overrides
//! let config = RuntimeConfig::from_file(Path::new("runtime.yaml"))?;
//!
//! println!("probing every {:?}", config.probe_interval());
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Plugin runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Seconds between scheduled health check passes
    pub probe_interval_secs: u64,

    /// Per-probe timeout in milliseconds
    pub probe_timeout_ms: u64,

    /// Default drain window for plugin unloads, in milliseconds
    pub drain_timeout_ms: u64,

    /// Buffer capacity of the in-process event channel
    pub event_capacity: usize,

    /// Per-plugin configuration sections, handed to each plugin's context
    /// at load time (keyed by plugin name)
    pub plugin_config: HashMap<String, serde_json::Value>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 60,
            probe_timeout_ms: 10_000,
            drain_timeout_ms: 30_000,
            event_capacity: 128,
            plugin_config: HashMap::new(),
        }
    }
}

/// YAML file shape: every field optional, defaults fill the gaps
#[derive(Debug, Default, Deserialize)]
struct RuntimeConfigFile {
    probe_interval_secs: Option<u64>,
    probe_timeout_ms: Option<u64>,
    drain_timeout_ms: Option<u64>,
    event_capacity: Option<usize>,
    #[serde(default)]
    plugins: HashMap<String, serde_json::Value>,
}

impl RuntimeConfig {
    /// Load configuration from environment variables (with `.env` support)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment variable overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let raw = std::fs::read_to_string(path)?;
        let file: RuntimeConfigFile = serde_yaml::from_str(&raw)?;

        let defaults = Self::default();
        let mut config = Self {
            probe_interval_secs: file
                .probe_interval_secs
                .unwrap_or(defaults.probe_interval_secs),
            probe_timeout_ms: file.probe_timeout_ms.unwrap_or(defaults.probe_timeout_ms),
            drain_timeout_ms: file.drain_timeout_ms.unwrap_or(defaults.drain_timeout_ms),
            event_capacity: file.event_capacity.unwrap_or(defaults.event_capacity),
            plugin_config: file.plugins,
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = parse_env("ANIMA_PROBE_INTERVAL_SECS")? {
            self.probe_interval_secs = value;
        }
        if let Some(value) = parse_env("ANIMA_PROBE_TIMEOUT_MS")? {
            self.probe_timeout_ms = value;
        }
        if let Some(value) = parse_env("ANIMA_DRAIN_TIMEOUT_MS")? {
            self.drain_timeout_ms = value;
        }
        if let Some(value) = parse_env("ANIMA_EVENT_CAPACITY")? {
            self.event_capacity = value;
        }
        Ok(())
    }

    /// Interval between scheduled probing passes
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Timeout applied to each individual probe
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Default drain window for plugin unloads
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Parse an optional environment variable, turning parse failures into a
/// named config error instead of a silent fallback.
fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => {
            let parsed = value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

//! Plugin Manifest and Installed-Plugin Records
//!
//! The manifest is a consumed, read-only contract: it ships with the plugin
//! package and tells the runtime what the plugin provides and how it wants
//! to be shut down. Installation itself (fetching and unpacking packages) is
//! an external subsystem; this module only defines the record shape and the
//! source interface the lifecycle manager consumes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::types::CapabilityKind;

/// How a plugin wants to be wound down on unload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownBehavior {
    /// Deactivate immediately; no drain window
    #[default]
    Graceful,

    /// Open a drain window before deactivation, even if the plugin exposes
    /// no drain hook
    Drain,
}

/// Optional `lifecycle` section of a manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleManifest {
    /// Shutdown style; defaults to graceful
    #[serde(default)]
    pub shutdown_behavior: ShutdownBehavior,

    /// Overrides the runtime's default drain timeout when present
    #[serde(default)]
    pub shutdown_timeout_ms: Option<u64>,
}

/// Manifest shipped inside a plugin package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name; must match what the loaded plugin reports
    pub name: String,

    /// Semantic version string
    pub version: String,

    /// Brief description
    #[serde(default)]
    pub description: String,

    /// Capability kinds the plugin provides (informational; the registry is
    /// populated by the plugin's own registrations at init time)
    #[serde(default)]
    pub capabilities: Vec<CapabilityKind>,

    /// Shutdown preferences
    #[serde(default)]
    pub lifecycle: Option<LifecycleManifest>,
}

impl PluginManifest {
    /// Create a minimal manifest
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            capabilities: Vec::new(),
            lifecycle: None,
        }
    }

    /// Declare drain-on-shutdown with an optional timeout override
    pub fn with_drain(mut self, shutdown_timeout_ms: Option<u64>) -> Self {
        self.lifecycle = Some(LifecycleManifest {
            shutdown_behavior: ShutdownBehavior::Drain,
            shutdown_timeout_ms,
        });
        self
    }

    /// Validate required fields and version syntax
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(ManifestError::MissingField("name"));
        }
        if self.version.is_empty() {
            return Err(ManifestError::MissingField("version"));
        }
        semver::Version::parse(&self.version).map_err(|e| ManifestError::InvalidVersion {
            version: self.version.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Whether the manifest asks for a drain window on unload
    pub fn wants_drain(&self) -> bool {
        self.lifecycle
            .as_ref()
            .is_some_and(|l| l.shutdown_behavior == ShutdownBehavior::Drain)
    }

    /// Manifest-level drain timeout override, if declared
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.lifecycle
            .as_ref()
            .and_then(|l| l.shutdown_timeout_ms)
            .map(Duration::from_millis)
    }

    /// Parse a manifest from a JSON or YAML file, by extension
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path)?;
        let manifest: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Manifest parsing/validation failures
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid manifest version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Persisted record for an installed plugin, owned by the installation
/// subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,

    /// Package location on disk
    pub path: PathBuf,

    /// Disabled plugins are never loaded or switched to
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Parsed manifest, when the installer provided one
    #[serde(default)]
    pub manifest: Option<PluginManifest>,
}

fn default_enabled() -> bool {
    true
}

impl InstalledPlugin {
    /// Create an enabled record with no manifest
    pub fn new(name: impl Into<String>, version: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            path: path.into(),
            enabled: true,
            manifest: None,
        }
    }

    /// Attach a manifest
    pub fn with_manifest(mut self, manifest: PluginManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Mark the record disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Source of installed-plugin records (the installation subsystem's listing
/// function, seen from this side of the boundary).
pub trait InstalledPlugins: Send + Sync {
    /// Every installed plugin, enabled or not
    fn list(&self) -> Vec<InstalledPlugin>;

    /// Look one plugin up by name
    fn get(&self, name: &str) -> Option<InstalledPlugin> {
        self.list().into_iter().find(|p| p.name == name)
    }
}

/// In-memory installed-plugin table, for tests and embedders that manage
/// their own plugin inventory.
#[derive(Default)]
pub struct StaticInstalledPlugins {
    records: RwLock<HashMap<String, InstalledPlugin>>,
}

impl StaticInstalledPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn insert(&self, record: InstalledPlugin) {
        self.records.write().insert(record.name.clone(), record);
    }

    /// Remove a record by name
    pub fn remove(&self, name: &str) {
        self.records.write().remove(name);
    }
}

impl InstalledPlugins for StaticInstalledPlugins {
    fn list(&self) -> Vec<InstalledPlugin> {
        self.records.read().values().cloned().collect()
    }

    fn get(&self, name: &str) -> Option<InstalledPlugin> {
        self.records.read().get(name).cloned()
    }
}

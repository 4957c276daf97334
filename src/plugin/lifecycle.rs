//! Plugin Lifecycle Management
//!
//! Orchestrates loading, unloading and switching of plugins, including the
//! graceful drain protocol.
//!
//! # Lifecycle State Machine
//!
//! ```text
//!   (absent)
//!      |
//!      v
//!  +---+-----+      +--------+      +----------+      +--------------+
//!  | Loading | ---> | Active | ---> | Draining | ---> | Deactivating |
//!  +---------+      +--------+      +----------+      +--------------+
//!                        |       (only when draining)        |
//!                        +------------------------------->---+
//!                                                            |
//!                                                            v
//!                                                        (absent)
//! ```
//!
//! A plugin not present in the state map is "not loaded"; unloading ends in
//! removal, not a terminal stored state. Runtime failures during unload
//! (drain overrun, failing shutdown hooks) are recorded and logged, never
//! raised: once started, an unload always completes.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::loader::{Plugin, PluginContext, PluginLoadError, PluginLoader};
use super::manifest::{InstalledPlugin, InstalledPlugins, PluginManifest};
use crate::capability::graph::CapabilityDependencyGraph;
use crate::capability::health::CapabilityHealthProber;
use crate::capability::registry::CapabilityRegistry;
use crate::capability::types::CapabilityKind;
use crate::events::{EventBus, RuntimeEvent, publish_best_effort};

/// Default drain window when neither caller nor manifest overrides it
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state of a loaded plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Being loaded and initialized
    Loading,

    /// Serving; providers and probes are registered
    Active,

    /// Drain window open; new work should be rejected
    Draining,

    /// Hooks running, registrations being reversed
    Deactivating,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Loading => write!(f, "loading"),
            PluginState::Active => write!(f, "active"),
            PluginState::Draining => write!(f, "draining"),
            PluginState::Deactivating => write!(f, "deactivating"),
        }
    }
}

/// Contract/configuration errors from lifecycle operations.
///
/// Environmental failures (drain overruns, failing hooks, probe errors)
/// never appear here; they become state and log lines.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("plugin '{0}' is not installed")]
    PluginNotInstalled(String),

    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("failed to load plugin '{name}': {source}")]
    LoadFailed {
        name: String,
        #[source]
        source: PluginLoadError,
    },

    #[error("plugin '{name}' init failed: {source}")]
    InitFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{name}' activation failed: {source}")]
    ActivateFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Options for [`PluginLifecycleManager::unload_plugin`]
#[derive(Debug, Clone)]
pub struct UnloadOptions {
    /// Skip the drain window entirely
    pub force: bool,

    /// Drain window length; a manifest `shutdown_timeout_ms` overrides it
    pub drain_timeout: Duration,
}

impl Default for UnloadOptions {
    fn default() -> Self {
        Self {
            force: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl UnloadOptions {
    /// Forced unload: no drain window
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Override the drain window length
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// A provider hand-over request for [`PluginLifecycleManager::switch_provider`]
#[derive(Debug, Clone)]
pub struct SwitchRequest {
    /// Capability whose provider is being switched (for logging/auditing)
    pub capability: CapabilityKind,

    /// Currently loaded plugin to retire
    pub from_plugin: String,

    /// Installed-but-unloaded plugin to take over
    pub to_plugin: String,
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    context: Arc<PluginContext>,
    manifest: Option<PluginManifest>,
    version: String,
}

/// Load/unload/switch orchestration over the capability components
pub struct PluginLifecycleManager {
    registry: Arc<CapabilityRegistry>,
    graph: Arc<CapabilityDependencyGraph>,
    prober: Arc<CapabilityHealthProber>,
    bus: Arc<dyn EventBus>,
    loader: Arc<dyn PluginLoader>,
    installed: Arc<dyn InstalledPlugins>,

    plugins: DashMap<String, LoadedPlugin>,
    states: DashMap<String, PluginState>,

    /// Per-plugin config sections handed to contexts at load time
    plugin_config: std::collections::HashMap<String, serde_json::Value>,
}

impl PluginLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        graph: Arc<CapabilityDependencyGraph>,
        prober: Arc<CapabilityHealthProber>,
        bus: Arc<dyn EventBus>,
        loader: Arc<dyn PluginLoader>,
        installed: Arc<dyn InstalledPlugins>,
        plugin_config: std::collections::HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            registry,
            graph,
            prober,
            bus,
            loader,
            installed,
            plugins: DashMap::new(),
            states: DashMap::new(),
            plugin_config,
        }
    }

    /// Load and activate an installed plugin.
    ///
    /// Sequence: resolve and instantiate through the loader, validate the
    /// contract (non-empty name/version, name agreement with the record and
    /// manifest), run `init` with an identity-bound context, mark active,
    /// run `on_activate`, emit `PluginActivated`. Any failure rolls back the
    /// partial registrations and leaves the plugin absent.
    pub async fn load_plugin(&self, installed: &InstalledPlugin) -> Result<(), LifecycleError> {
        let name = installed.name.clone();
        match self.states.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(LifecycleError::AlreadyLoaded(name));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(PluginState::Loading);
            }
        }
        tracing::info!(plugin = %name, "Loading plugin");

        let result = self.load_plugin_inner(installed).await;
        if result.is_err() {
            self.states.remove(&name);
        }
        result
    }

    async fn load_plugin_inner(&self, installed: &InstalledPlugin) -> Result<(), LifecycleError> {
        let name = installed.name.clone();

        let plugin = self
            .loader
            .load(installed)
            .await
            .map_err(|source| LifecycleError::LoadFailed {
                name: name.clone(),
                source,
            })?;

        self.validate_plugin(&*plugin, installed)?;

        let config = self
            .plugin_config
            .get(&name)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let context = Arc::new(PluginContext::new(
            name.clone(),
            config,
            Arc::clone(&self.registry),
            Arc::clone(&self.prober),
            Arc::clone(&self.graph),
        ));

        if let Err(source) = plugin.init(&context).await {
            context.teardown();
            return Err(LifecycleError::InitFailed { name, source });
        }

        self.states.insert(name.clone(), PluginState::Active);

        if let Err(source) = plugin.on_activate(&context).await {
            context.teardown();
            return Err(LifecycleError::ActivateFailed { name, source });
        }

        let version = plugin.version().to_string();
        self.plugins.insert(
            name.clone(),
            LoadedPlugin {
                plugin,
                context,
                manifest: installed.manifest.clone(),
                version: version.clone(),
            },
        );

        tracing::info!(plugin = %name, version = %version, "Plugin activated");
        publish_best_effort(
            &*self.bus,
            RuntimeEvent::PluginActivated {
                plugin: name,
                version,
            },
        );
        Ok(())
    }

    fn validate_plugin(
        &self,
        plugin: &dyn Plugin,
        installed: &InstalledPlugin,
    ) -> Result<(), LifecycleError> {
        if plugin.name().is_empty() {
            return Err(LifecycleError::InvalidPlugin(
                "plugin reports an empty name".to_string(),
            ));
        }
        if plugin.version().is_empty() {
            return Err(LifecycleError::InvalidPlugin(format!(
                "plugin '{}' reports an empty version",
                plugin.name()
            )));
        }
        if plugin.name() != installed.name {
            return Err(LifecycleError::InvalidPlugin(format!(
                "plugin reports name '{}' but the installed record is '{}'",
                plugin.name(),
                installed.name
            )));
        }
        if let Some(manifest) = &installed.manifest
            && manifest.name != installed.name
        {
            return Err(LifecycleError::InvalidPlugin(format!(
                "manifest name '{}' does not match installed record '{}'",
                manifest.name, installed.name
            )));
        }
        Ok(())
    }

    /// Unload a plugin, honoring the drain protocol.
    ///
    /// Returns `false` (a no-op) if the plugin is not loaded. A drain window
    /// opens iff the unload is not forced and the plugin either exposes a
    /// drain hook or its manifest declares drain-on-shutdown; the manifest's
    /// timeout override wins over `options.drain_timeout`. A drain that
    /// overruns is forced through, recorded in the `PluginDrained` event —
    /// the plugin-side drain work itself is never cancelled, the runtime
    /// just stops waiting for it.
    pub async fn unload_plugin(&self, name: &str, options: UnloadOptions) -> bool {
        let Some((_, loaded)) = self.plugins.remove(name) else {
            tracing::debug!(plugin = %name, "Unload requested for plugin that is not loaded");
            return false;
        };

        let drain_future = loaded.plugin.on_drain();
        let manifest_drain = loaded
            .manifest
            .as_ref()
            .is_some_and(|manifest| manifest.wants_drain());
        let should_drain = !options.force && (drain_future.is_some() || manifest_drain);
        let drain_timeout = loaded
            .manifest
            .as_ref()
            .and_then(|manifest| manifest.shutdown_timeout())
            .unwrap_or(options.drain_timeout);

        let mut was_forced = false;
        if should_drain {
            self.states.insert(name.to_string(), PluginState::Draining);
            tracing::info!(
                plugin = %name,
                timeout_ms = drain_timeout.as_millis() as u64,
                "Plugin draining"
            );
            publish_best_effort(
                &*self.bus,
                RuntimeEvent::PluginDraining {
                    plugin: name.to_string(),
                    timeout_ms: drain_timeout.as_millis() as u64,
                },
            );

            let started = Instant::now();
            // A manifest-declared drain with no hook is a ready no-op: the
            // window opens and closes immediately.
            let drain = drain_future.unwrap_or_else(|| Box::pin(async {}));
            if tokio::time::timeout(drain_timeout, drain).await.is_err() {
                was_forced = true;
                tracing::warn!(
                    plugin = %name,
                    timeout_ms = drain_timeout.as_millis() as u64,
                    "Drain timed out; forcing unload"
                );
            }
            publish_best_effort(
                &*self.bus,
                RuntimeEvent::PluginDrained {
                    plugin: name.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    was_forced,
                },
            );
        }

        self.states
            .insert(name.to_string(), PluginState::Deactivating);

        if let Err(e) = loaded.plugin.on_deactivate(&loaded.context).await {
            tracing::warn!(plugin = %name, error = %e, "on_deactivate hook failed");
        }
        if let Err(e) = loaded.plugin.shutdown().await {
            tracing::warn!(plugin = %name, error = %e, "shutdown hook failed");
        }

        loaded.context.teardown();

        tracing::info!(plugin = %name, version = %loaded.version, forced = was_forced, "Plugin deactivated");
        publish_best_effort(
            &*self.bus,
            RuntimeEvent::PluginDeactivated {
                plugin: name.to_string(),
                version: loaded.version.clone(),
                was_forced,
            },
        );

        self.states.remove(name);
        true
    }

    /// Retire `from_plugin` and bring up `to_plugin` in its place.
    ///
    /// The target must be installed and enabled; that is checked first, so a
    /// missing target surfaces as [`LifecycleError::PluginNotInstalled`]
    /// before anything is torn down. Between the unload and the new
    /// plugin's activation there is a brief window in which resolvers see no
    /// provider for the affected capability; callers treat `None` from the
    /// resolver as "retry shortly".
    pub async fn switch_provider(&self, request: &SwitchRequest) -> Result<(), LifecycleError> {
        let target = self
            .installed
            .get(&request.to_plugin)
            .filter(|record| record.enabled)
            .ok_or_else(|| LifecycleError::PluginNotInstalled(request.to_plugin.clone()))?;

        tracing::info!(
            capability = %request.capability,
            from = %request.from_plugin,
            to = %request.to_plugin,
            "Switching capability provider"
        );

        self.unload_plugin(&request.from_plugin, UnloadOptions::default())
            .await;
        self.load_plugin(&target).await
    }

    /// Current lifecycle state; `None` means not loaded
    pub fn get_plugin_state(&self, name: &str) -> Option<PluginState> {
        self.states.get(name).map(|state| *state)
    }

    /// True only while the plugin's drain window is open
    pub fn is_plugin_draining(&self, name: &str) -> bool {
        matches!(self.get_plugin_state(name), Some(PluginState::Draining))
    }

    /// Names of every currently loaded plugin
    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

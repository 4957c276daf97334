//! Plugin Runtime Context
//!
//! [`PluginRuntime`] is the single context object the daemon constructs at
//! process start and passes by reference to everything that needs the
//! capability system. There are no module-level singletons: tests build a
//! fresh runtime per case, embedders build exactly one.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use anima_runtime::config::RuntimeConfig;
//! use anima_runtime::events::BroadcastEventBus;
//! use anima_runtime::plugin::{StaticInstalledPlugins, StaticPluginLoader};
//! use anima_runtime::runtime::PluginRuntime;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = PluginRuntime::new(
//!     RuntimeConfig::from_env()?,
//!     Arc::new(BroadcastEventBus::default()),
//!     Arc::new(StaticPluginLoader::new()),
//!     Arc::new(StaticInstalledPlugins::new()),
//! );
//! runtime.start();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::capability::graph::CapabilityDependencyGraph;
use crate::capability::health::CapabilityHealthProber;
use crate::capability::registry::CapabilityRegistry;
use crate::capability::resolver::CapabilityResolver;
use crate::config::RuntimeConfig;
use crate::events::EventBus;
use crate::plugin::lifecycle::{PluginLifecycleManager, UnloadOptions};
use crate::plugin::loader::PluginLoader;
use crate::plugin::manifest::InstalledPlugins;

/// The wired-together extensibility runtime
pub struct PluginRuntime {
    config: RuntimeConfig,
    bus: Arc<dyn EventBus>,
    registry: Arc<CapabilityRegistry>,
    graph: Arc<CapabilityDependencyGraph>,
    prober: Arc<CapabilityHealthProber>,
    resolver: Arc<CapabilityResolver>,
    lifecycle: Arc<PluginLifecycleManager>,
}

impl PluginRuntime {
    /// Construct the runtime from its injected collaborators: the
    /// application event bus, the code loader, and the installed-plugin
    /// source.
    pub fn new(
        config: RuntimeConfig,
        bus: Arc<dyn EventBus>,
        loader: Arc<dyn PluginLoader>,
        installed: Arc<dyn InstalledPlugins>,
    ) -> Self {
        let registry = Arc::new(CapabilityRegistry::new(Arc::clone(&bus)));
        let graph = Arc::new(CapabilityDependencyGraph::new());
        let prober = Arc::new(CapabilityHealthProber::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            config.probe_interval(),
            config.probe_timeout(),
        ));
        let resolver = Arc::new(CapabilityResolver::new(
            Arc::clone(&registry),
            Arc::clone(&prober),
        ));
        let lifecycle = Arc::new(PluginLifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&graph),
            Arc::clone(&prober),
            Arc::clone(&bus),
            loader,
            installed,
            config.plugin_config.clone(),
        ));

        Self {
            config,
            bus,
            registry,
            graph,
            prober,
            resolver,
            lifecycle,
        }
    }

    /// Start background work (the health prober's recurring scheduler)
    pub fn start(&self) {
        self.prober.start();
    }

    /// Stop background work and gracefully unload every plugin.
    ///
    /// Drains are honored with the configured default timeout; a hanging
    /// drain delays shutdown by at most that window per plugin.
    pub async fn shutdown(&self) {
        self.prober.stop();
        for name in self.lifecycle.loaded_plugins() {
            self.lifecycle
                .unload_plugin(
                    &name,
                    UnloadOptions::default().with_drain_timeout(self.config.drain_timeout()),
                )
                .await;
        }
        tracing::info!("Plugin runtime shut down");
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &Arc<CapabilityDependencyGraph> {
        &self.graph
    }

    pub fn prober(&self) -> &Arc<CapabilityHealthProber> {
        &self.prober
    }

    pub fn resolver(&self) -> &Arc<CapabilityResolver> {
        &self.resolver
    }

    pub fn lifecycle(&self) -> &Arc<PluginLifecycleManager> {
        &self.lifecycle
    }
}

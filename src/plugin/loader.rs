//! Plugin Contract and Loading
//!
//! Defines what a plugin looks like to the runtime ([`Plugin`]), the
//! identity-bound context it registers through ([`PluginContext`]), and the
//! injected abstraction that turns installed records into live plugin
//! instances ([`PluginLoader`]).
//!
//! The loader is a trait so the lifecycle manager never touches the actual
//! code-loading mechanism: production wires in whatever the daemon uses
//! (dynamic libraries, embedded interpreters), while tests and
//! statically-linked built-ins use [`StaticPluginLoader`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::manifest::InstalledPlugin;
use crate::capability::graph::CapabilityDependencyGraph;
use crate::capability::health::{CapabilityHealthProber, ProbeFn};
use crate::capability::registry::CapabilityRegistry;
use crate::capability::types::{CapabilityKind, CapabilityRequirement, Provider};

/// Future driving a plugin's graceful wind-down
pub type DrainFuture = BoxFuture<'static, ()>;

/// The contract a plugin module fulfils.
///
/// All hooks are optional — the defaults do nothing — except `name` and
/// `version`, which the lifecycle manager validates at load time.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name; must be non-empty and match the installed record
    fn name(&self) -> &str;

    /// Plugin version; must be non-empty
    fn version(&self) -> &str;

    /// Called once after loading, before activation. Registrations into the
    /// runtime (providers, probes, dependencies) happen here through the
    /// context. Returning an error aborts the load.
    async fn init(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called after the plugin is marked active
    async fn on_activate(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Graceful wind-down hook. Returning `None` (the default) means the
    /// plugin has no drain work. The returned future performs the wind-down
    /// when polled — implementations must not start the work before
    /// returning, because a forced unload drops the future unpolled.
    fn on_drain(&self) -> Option<DrainFuture> {
        None
    }

    /// Called while the plugin is deactivating, before `shutdown`. Failures
    /// are logged, never propagated: deactivation always completes.
    async fn on_deactivate(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Final cleanup. Failures are logged, never propagated.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Registrations {
    providers: Vec<(CapabilityKind, String)>,
    probes: Vec<(CapabilityKind, String)>,
}

/// Runtime handle bound to one plugin's identity.
///
/// Every registration made through the context is recorded, so unloading
/// the plugin reverses exactly what it registered — nothing more, nothing
/// less.
pub struct PluginContext {
    plugin_name: String,
    config: serde_json::Value,
    registry: Arc<CapabilityRegistry>,
    prober: Arc<CapabilityHealthProber>,
    graph: Arc<CapabilityDependencyGraph>,
    registrations: Mutex<Registrations>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin_name: impl Into<String>,
        config: serde_json::Value,
        registry: Arc<CapabilityRegistry>,
        prober: Arc<CapabilityHealthProber>,
        graph: Arc<CapabilityDependencyGraph>,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            config,
            registry,
            prober,
            graph,
            registrations: Mutex::new(Registrations::default()),
        }
    }

    /// The owning plugin's name
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Plugin-specific configuration from the runtime config, `Null` if none
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// Register a capability provider owned by this plugin
    pub fn register_provider(&self, capability: &CapabilityKind, provider: Provider) {
        self.registrations
            .lock()
            .providers
            .push((capability.clone(), provider.id.clone()));
        self.registry.register_provider(capability, provider);
    }

    /// Register a health probe owned by this plugin
    pub fn register_health_probe(
        &self,
        capability: &CapabilityKind,
        provider_id: &str,
        probe: ProbeFn,
    ) {
        self.registrations
            .lock()
            .probes
            .push((capability.clone(), provider_id.to_string()));
        self.prober.register_probe(capability, provider_id, probe);
    }

    /// Declare the capabilities this plugin depends on, replacing any prior
    /// declaration
    pub fn declare_dependencies(&self, requirements: Vec<CapabilityRequirement>) {
        self.graph.register_plugin(&self.plugin_name, requirements);
    }

    /// Reverse every registration this context recorded. Called by the
    /// lifecycle manager during unload (and after a failed load).
    pub(crate) fn teardown(&self) {
        let recorded = {
            let mut registrations = self.registrations.lock();
            std::mem::take(&mut *registrations)
        };
        for (capability, provider_id) in &recorded.probes {
            self.prober.unregister_probe(capability, provider_id);
        }
        for (capability, provider_id) in &recorded.providers {
            self.registry.unregister_provider(capability, provider_id);
        }
        self.graph.unregister_plugin(&self.plugin_name);
    }
}

/// Errors turning an installed record into a live plugin
#[derive(Debug, thiserror::Error)]
pub enum PluginLoadError {
    #[error("no loadable plugin for '{0}'")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin load failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Injected code-loading abstraction consumed by the lifecycle manager
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Resolve the installed record's entry point and instantiate the plugin
    async fn load(&self, installed: &InstalledPlugin) -> Result<Arc<dyn Plugin>, PluginLoadError>;
}

/// Factory producing a plugin instance
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Loader backed by an in-memory name → factory table.
///
/// This is how statically-linked built-in plugins reach the lifecycle
/// manager, and how tests supply fakes.
#[derive(Default)]
pub struct StaticPluginLoader {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl StaticPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a plugin name
    pub fn register(&self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.write().insert(name.into(), factory);
    }
}

#[async_trait]
impl PluginLoader for StaticPluginLoader {
    async fn load(&self, installed: &InstalledPlugin) -> Result<Arc<dyn Plugin>, PluginLoadError> {
        let factory = self
            .factories
            .read()
            .get(&installed.name)
            .cloned()
            .ok_or_else(|| PluginLoadError::NotFound(installed.name.clone()))?;
        Ok(factory())
    }
}

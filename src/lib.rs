//! Anima Plugin Runtime
//!
//! The extensibility runtime of the Anima assistant daemon: plugins register
//! and de-register capability providers (text generation, speech-to-text,
//! text-to-speech, image generation, embeddings, and whatever comes next) at
//! runtime; the runtime tracks which providers are healthy, picks the best
//! one for each request, and hot-swaps or removes plugins without dropping
//! in-flight work.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PluginRuntime                             │
//! │                                                                  │
//! │  PluginLifecycleManager ──loads──▶ Plugin::init(PluginContext)   │
//! │          │                              │ registers              │
//! │          │ drains/unloads               ▼                        │
//! │          │              CapabilityRegistry ◀──reads── Resolver   │
//! │          │              CapabilityDependencyGraph         ▲      │
//! │          └─reverses──▶  CapabilityHealthProber ──health───┘      │
//! │                                  │                               │
//! │                            EventBus (app-wide)                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use anima_runtime::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = PluginRuntime::new(
//!     RuntimeConfig::from_env()?,
//!     Arc::new(BroadcastEventBus::default()),
//!     Arc::new(StaticPluginLoader::new()),
//!     Arc::new(StaticInstalledPlugins::new()),
//! );
//! runtime.start();
//!
//! let stt = CapabilityKind::new(CapabilityKind::STT);
//! match runtime.resolver().resolve_capability(&stt, &ResolveOptions::default()) {
//!     Some(resolved) => println!("using {}", resolved.provider.name),
//!     None => println!("no provider available right now"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod events;
pub mod logging;
pub mod plugin;
pub mod runtime;

// Re-export commonly used items for convenience
pub use capability::{
    CapabilityDependencyGraph, CapabilityHealthProber, CapabilityKind, CapabilityRegistry,
    CapabilityRequirement, CapabilityResolver, HealthSnapshot, Provider, ResolveOptions,
};
pub use config::RuntimeConfig;
pub use events::{BroadcastEventBus, EventBus, RuntimeEvent};
pub use plugin::{Plugin, PluginContext, PluginLifecycleManager, PluginManifest};
pub use runtime::PluginRuntime;

/// Prelude module for convenient imports
///
/// Use this for embedding the runtime or writing plugins:
/// ```ignore
/// use anima_runtime::prelude::*;
/// ```
pub mod prelude {
    pub use crate::capability::graph::CapabilityDependencyGraph;
    pub use crate::capability::health::{
        CapabilityHealthProber, HealthSnapshot, HealthTransition, ProbeFn, ProbeFuture,
        ProviderHealth,
    };
    pub use crate::capability::probes::{http_probe, http_probe_with_client};
    pub use crate::capability::registry::CapabilityRegistry;
    pub use crate::capability::resolver::{CapabilityResolver, ResolveOptions, ResolvedProvider};
    pub use crate::capability::types::{
        CapabilityInfo, CapabilityKind, CapabilityRequirement, Provider, RequirementsReport,
    };
    pub use crate::config::RuntimeConfig;
    pub use crate::events::{BroadcastEventBus, EventBus, NullEventBus, RuntimeEvent};
    pub use crate::plugin::lifecycle::{
        LifecycleError, PluginLifecycleManager, PluginState, SwitchRequest, UnloadOptions,
    };
    pub use crate::plugin::loader::{
        DrainFuture, Plugin, PluginContext, PluginLoader, StaticPluginLoader,
    };
    pub use crate::plugin::manifest::{
        InstalledPlugin, InstalledPlugins, PluginManifest, ShutdownBehavior,
        StaticInstalledPlugins,
    };
    pub use crate::runtime::PluginRuntime;

    // Re-export commonly needed external crates for plugin implementations
    pub use async_trait::async_trait;
    pub use serde_json::Value;
    pub use std::sync::Arc;
}

//! Plugin System
//!
//! Everything it takes to host independently-authored plugins:
//!
//! - [`manifest`] — the consumed manifest contract and installed-plugin
//!   records (installation itself is an external subsystem)
//! - [`loader`] — the [`Plugin`] contract, identity-bound registration
//!   context, and the injected code-loading abstraction
//! - [`lifecycle`] — load/unload/switch orchestration with the graceful
//!   drain protocol
//!
//! A plugin's `init` hook registers capability providers, health probes and
//! dependency declarations through its [`PluginContext`]; unloading reverses
//! exactly those registrations after the drain window closes.

pub mod lifecycle;
pub mod loader;
pub mod manifest;

pub use lifecycle::{
    DEFAULT_DRAIN_TIMEOUT, LifecycleError, PluginLifecycleManager, PluginState, SwitchRequest,
    UnloadOptions,
};
pub use loader::{
    DrainFuture, Plugin, PluginContext, PluginFactory, PluginLoadError, PluginLoader,
    StaticPluginLoader,
};
pub use manifest::{
    InstalledPlugin, InstalledPlugins, LifecycleManifest, ManifestError, PluginManifest,
    ShutdownBehavior, StaticInstalledPlugins,
};

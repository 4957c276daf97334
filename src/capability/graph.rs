//! Capability Dependency Graph
//!
//! Tracks which plugins require which capabilities, so that removal flows
//! can warn before the last provider of a capability disappears.
//!
//! Two indices are kept: plugin → requirement list, and capability →
//! dependent plugin set. Both live under one lock and every mutation updates
//! them together, so the forward and reverse views can never disagree.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use super::types::{CapabilityKind, CapabilityRequirement};

#[derive(Default)]
struct GraphInner {
    /// Plugin name → its declared requirements
    by_plugin: HashMap<String, Vec<CapabilityRequirement>>,

    /// Capability → names of plugins that require it (optional or not)
    dependents: HashMap<CapabilityKind, BTreeSet<String>>,
}

/// Plugin ↔ capability dependency edges
#[derive(Default)]
pub struct CapabilityDependencyGraph {
    inner: RwLock<GraphInner>,
}

impl CapabilityDependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plugin's requirement set, replacing any previous set
    /// atomically so reverse lookups stay consistent across a reload.
    pub fn register_plugin(&self, plugin_name: &str, requirements: Vec<CapabilityRequirement>) {
        let mut inner = self.inner.write();

        Self::remove_edges(&mut inner, plugin_name);

        for requirement in &requirements {
            inner
                .dependents
                .entry(requirement.capability.clone())
                .or_default()
                .insert(plugin_name.to_string());
        }
        inner
            .by_plugin
            .insert(plugin_name.to_string(), requirements);

        tracing::debug!(plugin = %plugin_name, "Registered capability dependencies");
    }

    /// Remove every edge for a plugin. No-op if the plugin is unknown.
    pub fn unregister_plugin(&self, plugin_name: &str) {
        let mut inner = self.inner.write();
        if Self::remove_edges(&mut inner, plugin_name) {
            tracing::debug!(plugin = %plugin_name, "Unregistered capability dependencies");
        }
    }

    fn remove_edges(inner: &mut GraphInner, plugin_name: &str) -> bool {
        let Some(requirements) = inner.by_plugin.remove(plugin_name) else {
            return false;
        };
        for requirement in &requirements {
            if let Some(plugins) = inner.dependents.get_mut(&requirement.capability) {
                plugins.remove(plugin_name);
                if plugins.is_empty() {
                    inner.dependents.remove(&requirement.capability);
                }
            }
        }
        true
    }

    /// Every plugin (optional or not) that currently requires the capability,
    /// sorted by name.
    pub fn get_dependents(&self, capability: &CapabilityKind) -> Vec<String> {
        self.inner
            .read()
            .dependents
            .get(capability)
            .map(|plugins| plugins.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Plugins whose requirement on the capability is non-optional — the list
    /// a removal-confirmation UI shows before the last provider goes away.
    /// Sorted by name.
    pub fn get_affected_plugins(&self, capability: &CapabilityKind) -> Vec<String> {
        let inner = self.inner.read();
        let Some(plugins) = inner.dependents.get(capability) else {
            return Vec::new();
        };
        plugins
            .iter()
            .filter(|plugin| {
                inner
                    .by_plugin
                    .get(*plugin)
                    .is_some_and(|requirements| {
                        requirements
                            .iter()
                            .any(|r| &r.capability == capability && !r.optional)
                    })
            })
            .cloned()
            .collect()
    }
}

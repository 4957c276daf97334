//! Capability Registry
//!
//! Central bookkeeping of capability kind → provider set. The registry is
//! pure in-memory state: every operation is total, performs no I/O, and its
//! only side effects are the internal map and a notification on the bus.
//!
//! Providers are kept in registration order per capability because the
//! resolver's scan order and tie-breaks are defined by it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::{
    CapabilityInfo, CapabilityKind, CapabilityRequirement, Provider, RequirementsReport,
};
use crate::events::{EventBus, RuntimeEvent, publish_best_effort};

/// Capability kind → ordered provider list.
///
/// Unknown capability kinds are accepted on registration and get their own
/// entry; lookups of kinds the registry has never seen return empty results
/// without creating state.
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<CapabilityKind, Vec<Provider>>>,
    bus: Arc<dyn EventBus>,
}

impl CapabilityRegistry {
    /// Create a registry pre-seeded with the stock capability kinds
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let mut entries = HashMap::new();
        for kind in CapabilityKind::seeded() {
            entries.insert(kind, Vec::new());
        }
        Self {
            entries: RwLock::new(entries),
            bus,
        }
    }

    /// Register (or update) a provider under a capability.
    ///
    /// Idempotent upsert keyed by `(capability, provider.id)`: re-registering
    /// an existing id replaces the provider in place, keeping its original
    /// position in the scan order.
    pub fn register_provider(&self, capability: &CapabilityKind, provider: Provider) {
        let provider_id = provider.id.clone();
        let provider_name = provider.name.clone();

        {
            let mut entries = self.entries.write();
            let providers = entries.entry(capability.clone()).or_default();
            match providers.iter_mut().find(|p| p.id == provider.id) {
                Some(existing) => *existing = provider,
                None => providers.push(provider),
            }
        }

        tracing::debug!(
            capability = %capability,
            provider_id = %provider_id,
            "Registered capability provider"
        );

        publish_best_effort(
            &*self.bus,
            RuntimeEvent::ProviderRegistered {
                capability: capability.clone(),
                provider_id,
                provider_name,
            },
        );
    }

    /// Remove a provider. No-op (and no event) if it is not registered.
    pub fn unregister_provider(&self, capability: &CapabilityKind, provider_id: &str) {
        let removed = {
            let mut entries = self.entries.write();
            match entries.get_mut(capability) {
                Some(providers) => {
                    let before = providers.len();
                    providers.retain(|p| p.id != provider_id);
                    providers.len() != before
                }
                None => false,
            }
        };

        if !removed {
            return;
        }

        tracing::debug!(
            capability = %capability,
            provider_id = %provider_id,
            "Unregistered capability provider"
        );

        publish_best_effort(
            &*self.bus,
            RuntimeEvent::ProviderUnregistered {
                capability: capability.clone(),
                provider_id: provider_id.to_string(),
            },
        );
    }

    /// All providers for a capability, in registration order. Empty for
    /// unknown kinds.
    pub fn get_providers(&self, capability: &CapabilityKind) -> Vec<Provider> {
        self.entries
            .read()
            .get(capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the capability has an entry (seeded or ever registered),
    /// even one with zero providers
    pub fn has_capability(&self, capability: &CapabilityKind) -> bool {
        self.entries.read().contains_key(capability)
    }

    /// Whether at least one provider is registered for the capability
    pub fn has_provider(&self, capability: &CapabilityKind) -> bool {
        self.entries
            .read()
            .get(capability)
            .is_some_and(|providers| !providers.is_empty())
    }

    /// Look up one provider by id
    pub fn get_provider(&self, capability: &CapabilityKind, provider_id: &str) -> Option<Provider> {
        self.entries
            .read()
            .get(capability)?
            .iter()
            .find(|p| p.id == provider_id)
            .cloned()
    }

    /// Every known capability with its provider count, sorted by kind
    pub fn list_capabilities(&self) -> Vec<CapabilityInfo> {
        let entries = self.entries.read();
        let mut infos: Vec<CapabilityInfo> = entries
            .iter()
            .map(|(capability, providers)| CapabilityInfo {
                capability: capability.clone(),
                provider_count: providers.len(),
            })
            .collect();
        infos.sort_by(|a, b| a.capability.cmp(&b.capability));
        infos
    }

    /// Consistent listing of every known capability with its providers,
    /// sorted by kind. This is the view a probing pass works from.
    pub fn capabilities_with_providers(&self) -> Vec<(CapabilityKind, Vec<Provider>)> {
        let entries = self.entries.read();
        let mut listing: Vec<(CapabilityKind, Vec<Provider>)> = entries
            .iter()
            .map(|(capability, providers)| (capability.clone(), providers.clone()))
            .collect();
        listing.sort_by(|a, b| a.0.cmp(&b.0));
        listing
    }

    /// Check a requirement set against the current provider population.
    ///
    /// A requirement is satisfied iff the capability has at least one
    /// provider. Optional misses are reported separately and never flip
    /// `satisfied`.
    pub fn check_requirements(
        &self,
        requirements: &[CapabilityRequirement],
    ) -> RequirementsReport {
        let mut missing = Vec::new();
        let mut optional = Vec::new();

        for requirement in requirements {
            if self.has_provider(&requirement.capability) {
                continue;
            }
            if requirement.optional {
                optional.push(requirement.capability.clone());
            } else {
                missing.push(requirement.capability.clone());
            }
        }

        RequirementsReport {
            satisfied: missing.is_empty(),
            missing,
            optional,
        }
    }
}

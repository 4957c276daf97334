//! Capability Resolver
//!
//! Picks a provider for a capability request given a preference and a health
//! policy. The resolver holds no state of its own: every call reads the
//! registry and the prober's stored health, so a decision always reflects
//! the latest completed probing pass.
//!
//! Returning `None` is not an error — it means "no provider available right
//! now" and callers apply their own fallback or backoff.

use serde::Serialize;
use std::sync::Arc;

use super::health::CapabilityHealthProber;
use super::registry::CapabilityRegistry;
use super::types::{CapabilityKind, Provider};

/// Selection options for [`CapabilityResolver::resolve_capability`]
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Provider id to prefer when it qualifies
    pub preferred_provider: Option<String>,

    /// When true (the default), only healthy providers qualify
    pub healthy_only: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            healthy_only: true,
        }
    }
}

impl ResolveOptions {
    /// Prefer the given provider id
    pub fn prefer(provider_id: impl Into<String>) -> Self {
        Self {
            preferred_provider: Some(provider_id.into()),
            ..Self::default()
        }
    }

    /// Allow unhealthy providers to be selected
    pub fn any_health(mut self) -> Self {
        self.healthy_only = false;
        self
    }
}

/// A resolved provider with the health standing that selected it
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProvider {
    pub capability: CapabilityKind,
    pub provider: Provider,
    pub healthy: bool,
}

/// Read-only provider-selection policy over registry + prober
pub struct CapabilityResolver {
    registry: Arc<CapabilityRegistry>,
    prober: Arc<CapabilityHealthProber>,
}

impl CapabilityResolver {
    pub fn new(registry: Arc<CapabilityRegistry>, prober: Arc<CapabilityHealthProber>) -> Self {
        Self { registry, prober }
    }

    /// Pick one provider for a capability.
    ///
    /// Order: a qualifying preferred provider wins; otherwise the first
    /// qualifying provider in registration order; otherwise `None`.
    /// A provider with no stored health state counts as healthy.
    pub fn resolve_capability(
        &self,
        capability: &CapabilityKind,
        options: &ResolveOptions,
    ) -> Option<ResolvedProvider> {
        if let Some(preferred_id) = &options.preferred_provider
            && let Some(provider) = self.registry.get_provider(capability, preferred_id)
        {
            let healthy = self.provider_healthy(capability, preferred_id);
            if !options.healthy_only || healthy {
                return Some(ResolvedProvider {
                    capability: capability.clone(),
                    provider,
                    healthy,
                });
            }
        }

        for provider in self.registry.get_providers(capability) {
            let healthy = self.provider_healthy(capability, &provider.id);
            if !options.healthy_only || healthy {
                return Some(ResolvedProvider {
                    capability: capability.clone(),
                    provider,
                    healthy,
                });
            }
        }

        None
    }

    /// Every provider for a capability, healthy ones first. The sort is
    /// stable, so ties keep registration order.
    pub fn resolve_all_providers(&self, capability: &CapabilityKind) -> Vec<ResolvedProvider> {
        let mut resolved: Vec<ResolvedProvider> = self
            .registry
            .get_providers(capability)
            .into_iter()
            .map(|provider| {
                let healthy = self.provider_healthy(capability, &provider.id);
                ResolvedProvider {
                    capability: capability.clone(),
                    provider,
                    healthy,
                }
            })
            .collect();
        resolved.sort_by_key(|r| !r.healthy);
        resolved
    }

    fn provider_healthy(&self, capability: &CapabilityKind, provider_id: &str) -> bool {
        self.prober
            .get_provider_health(capability, provider_id)
            .map(|health| health.healthy)
            .unwrap_or(true)
    }
}

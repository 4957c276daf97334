//! Runtime Notifications
//!
//! Typed notification payloads emitted by the capability and lifecycle
//! components, and the interface to the application-wide event bus.
//!
//! The bus itself is an external collaborator: the daemon wires its own
//! implementation in via the [`EventBus`] trait. [`BroadcastEventBus`] is the
//! in-process implementation used by tests and simple embedders. Every event
//! name carries its own payload struct-variant so consumers never parse an
//! untyped bag of fields.
//!
//! Publishing is always best-effort: a failing bus is logged and never fails
//! the operation that produced the event.

use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::capability::types::CapabilityKind;

/// Notifications produced by the runtime, one variant per event name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RuntimeEvent {
    /// A provider was registered for a capability
    ProviderRegistered {
        capability: CapabilityKind,
        provider_id: String,
        provider_name: String,
    },

    /// A provider was removed from a capability
    ProviderUnregistered {
        capability: CapabilityKind,
        provider_id: String,
    },

    /// A provider crossed the healthy/unhealthy boundary
    ProviderHealthChanged {
        capability: CapabilityKind,
        provider_id: String,
        provider_name: String,
        previous_healthy: bool,
        current_healthy: bool,
        error: Option<String>,
    },

    /// A plugin finished loading and activation
    PluginActivated { plugin: String, version: String },

    /// A plugin entered its drain window
    PluginDraining { plugin: String, timeout_ms: u64 },

    /// A plugin's drain window closed, naturally or by force
    PluginDrained {
        plugin: String,
        elapsed_ms: u64,
        was_forced: bool,
    },

    /// A plugin was fully unloaded
    PluginDeactivated {
        plugin: String,
        version: String,
        was_forced: bool,
    },

    /// A scheduled health check pass failed outright
    HealthCheckError { error: String },
}

/// Envelope published to the bus: payload plus identity and wall-clock time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event id
    pub id: Uuid,

    /// Wall-clock publication time
    pub timestamp: SystemTime,

    /// The typed payload
    #[serde(flatten)]
    pub event: RuntimeEvent,
}

impl EventEnvelope {
    /// Wrap a payload in a fresh envelope
    pub fn new(event: RuntimeEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            event,
        }
    }
}

/// Application-wide event bus interface.
///
/// Implementations forward envelopes to whatever transport the daemon uses.
/// Failures are surfaced to the caller, which logs and continues; no runtime
/// operation depends on a publish succeeding.
pub trait EventBus: Send + Sync {
    /// Publish one event
    fn publish(&self, event: RuntimeEvent) -> anyhow::Result<()>;
}

/// Publish an event, logging and swallowing any bus failure.
pub(crate) fn publish_best_effort(bus: &dyn EventBus, event: RuntimeEvent) {
    if let Err(e) = bus.publish(event) {
        tracing::warn!(error = %e, "Event bus publish failed");
    }
}

/// In-process event bus over a tokio broadcast channel.
///
/// Sending to a channel with no subscribers is not an error; events are
/// simply dropped, matching fire-and-forget bus semantics.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventBus {
    /// Create a bus buffering up to `capacity` undelivered envelopes
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every envelope published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: RuntimeEvent) -> anyhow::Result<()> {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(EventEnvelope::new(event));
        Ok(())
    }
}

/// Bus that discards everything. Useful for embedders that don't care about
/// notifications and for unit tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn publish(&self, _event: RuntimeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shorthand for the shared bus handle carried by every component
pub type SharedEventBus = Arc<dyn EventBus>;

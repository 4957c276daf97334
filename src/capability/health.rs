//! Capability Health Prober
//!
//! Periodically runs registered probe functions against every provider in
//! the registry, stores per-provider health records, and detects transitions
//! across the healthy/unhealthy boundary.
//!
//! # Probing model
//!
//! A probing pass takes one consistent listing of the registry, builds one
//! task per `(capability, provider)` pair and runs them all concurrently,
//! each bounded by the configured per-probe timeout. Providers without a
//! registered probe are optimistically healthy. Results are applied to the
//! stored health state only after every task of the pass has settled, so
//! readers never observe a half-applied pass.
//!
//! A probe that rejects, panics or times out degrades only its own provider;
//! it can never fail a pass. Transition events are delivered on a local
//! broadcast channel and forwarded to the application event bus best-effort.

use arc_swap::ArcSwapOption;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::registry::CapabilityRegistry;
use super::types::{CapabilityKind, Provider};
use crate::events::{EventBus, RuntimeEvent, publish_best_effort};

/// Future returned by a probe function. Resolving to `Ok(false)` or `Err(_)`
/// both mean unhealthy; the error string is kept on the health record.
pub type ProbeFuture = BoxFuture<'static, anyhow::Result<bool>>;

/// A health probe registered for one `(capability, provider)` pair
pub type ProbeFn = Arc<dyn Fn() -> ProbeFuture + Send + Sync>;

type ProbeKey = (CapabilityKind, String);

/// Stored health state for one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub capability: CapabilityKind,
    pub provider_id: String,
    pub provider_name: String,

    /// Result of the most recent check
    pub healthy: bool,

    /// When the most recent check completed
    pub last_check: SystemTime,

    /// Last time the provider was seen healthy, carried across failures
    pub last_healthy: Option<SystemTime>,

    /// Error from the most recent check, if it failed
    pub error: Option<String>,

    /// How long the most recent probe took
    pub response_time_ms: u64,

    /// Failed checks since the last healthy one
    pub consecutive_failures: u32,
}

/// Health of one capability: healthy iff any provider is
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityHealth {
    pub capability: CapabilityKind,
    pub healthy: bool,
    pub providers: Vec<ProviderHealth>,
    pub healthy_count: usize,
    pub total_count: usize,
}

/// Full health state across every known capability at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub timestamp: SystemTime,
    pub capabilities: Vec<CapabilityHealth>,

    /// Conjunction of per-capability health across all known capabilities
    pub overall_healthy: bool,
}

/// A provider crossing the healthy/unhealthy boundary
#[derive(Debug, Clone, Serialize)]
pub struct HealthTransition {
    pub capability: CapabilityKind,
    pub provider_id: String,
    pub provider_name: String,
    pub previous_healthy: bool,
    pub current_healthy: bool,
    pub error: Option<String>,
}

struct ProbeOutcome {
    key: ProbeKey,
    provider_name: String,
    healthy: bool,
    error: Option<String>,
    response_time_ms: u64,
}

/// Periodic, concurrency-safe liveness checker for capability providers
pub struct CapabilityHealthProber {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<dyn EventBus>,
    interval: Duration,
    probe_timeout: Duration,

    probes: RwLock<HashMap<ProbeKey, ProbeFn>>,
    state: Mutex<HashMap<ProbeKey, ProviderHealth>>,

    /// Snapshot built by the most recent completed pass
    last_snapshot: ArcSwapOption<HealthSnapshot>,

    /// Held for the duration of one probing pass; a losing `try_lock`
    /// means a pass is in flight and the caller gets the last snapshot
    pass_gate: tokio::sync::Mutex<()>,

    /// Abort flag for the current epoch: passes capture it at start and
    /// discard their results if it is cancelled by the time they finish
    abort: RwLock<CancellationToken>,

    /// Cancellation for the recurring scheduler task, present while running
    scheduler: Mutex<Option<CancellationToken>>,

    transitions: broadcast::Sender<HealthTransition>,
}

impl CapabilityHealthProber {
    /// Create a prober over the given registry.
    ///
    /// `interval` drives the recurring scheduler started by [`start`];
    /// `probe_timeout` bounds every individual probe invocation.
    ///
    /// [`start`]: CapabilityHealthProber::start
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        bus: Arc<dyn EventBus>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            registry,
            bus,
            interval,
            probe_timeout,
            probes: RwLock::new(HashMap::new()),
            state: Mutex::new(HashMap::new()),
            last_snapshot: ArcSwapOption::empty(),
            pass_gate: tokio::sync::Mutex::new(()),
            abort: RwLock::new(CancellationToken::new()),
            scheduler: Mutex::new(None),
            transitions,
        }
    }

    /// Register a probe for a `(capability, provider)` pair, replacing any
    /// existing one.
    pub fn register_probe(
        &self,
        capability: &CapabilityKind,
        provider_id: &str,
        probe: ProbeFn,
    ) {
        self.probes
            .write()
            .insert((capability.clone(), provider_id.to_string()), probe);
        tracing::debug!(
            capability = %capability,
            provider_id = %provider_id,
            "Registered health probe"
        );
    }

    /// Remove a probe and its stored health state, so churned providers do
    /// not accumulate dead records.
    pub fn unregister_probe(&self, capability: &CapabilityKind, provider_id: &str) {
        let key = (capability.clone(), provider_id.to_string());
        self.probes.write().remove(&key);
        self.state.lock().remove(&key);
        tracing::debug!(
            capability = %capability,
            provider_id = %provider_id,
            "Unregistered health probe"
        );
    }

    /// Subscribe to health transitions detected by subsequent passes
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<HealthTransition> {
        self.transitions.subscribe()
    }

    /// Start the recurring scheduler: one immediate pass, then one every
    /// configured interval. Idempotent; a second call while running is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            tracing::debug!("Health prober already running");
            return;
        }

        let cancel = CancellationToken::new();
        *self.abort.write() = cancel.clone();

        let prober = Arc::clone(self);
        let token = cancel.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Each pass runs in its own task: a panicking probe
                        // pass surfaces here as a JoinError instead of
                        // killing the scheduler.
                        let pass = Arc::clone(&prober);
                        if let Err(e) = tokio::spawn(async move { pass.check().await }).await {
                            tracing::error!(error = %e, "Health check pass failed");
                            publish_best_effort(
                                &*prober.bus,
                                RuntimeEvent::HealthCheckError {
                                    error: e.to_string(),
                                },
                            );
                        }
                    }
                }
            }
            tracing::debug!("Health prober scheduler stopped");
        });

        *scheduler = Some(cancel);
        tracing::info!(interval_secs = period.as_secs(), "Health prober started");
    }

    /// Cancel the recurring timer.
    ///
    /// Probes already dispatched are left to their own timeout; a pass in
    /// flight at this moment discards its results instead of applying a
    /// post-stop write. Manual [`check`] calls made after `stop` behave
    /// normally.
    ///
    /// [`check`]: CapabilityHealthProber::check
    pub fn stop(&self) {
        let mut scheduler = self.scheduler.lock();
        let Some(cancel) = scheduler.take() else {
            return;
        };
        cancel.cancel();
        *self.abort.write() = CancellationToken::new();
        tracing::info!("Health prober stopped");
    }

    /// Whether the recurring scheduler is currently running
    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Run one full probing pass and return the resulting snapshot.
    ///
    /// Reentrant-safe: if a pass is already in flight, the call does not
    /// start a second one — it returns the last completed snapshot (or a
    /// view synthesized from stored state before any pass has run).
    pub async fn check(&self) -> Arc<HealthSnapshot> {
        let Ok(_pass) = self.pass_gate.try_lock() else {
            tracing::debug!("Health check already in flight; returning last snapshot");
            return self.latest_snapshot();
        };
        self.run_pass().await
    }

    async fn run_pass(&self) -> Arc<HealthSnapshot> {
        let abort = self.abort.read().clone();
        let listing = self.registry.capabilities_with_providers();

        let mut tasks: Vec<BoxFuture<'static, ProbeOutcome>> = Vec::new();
        {
            let probes = self.probes.read();
            for (capability, providers) in &listing {
                for provider in providers {
                    let key = (capability.clone(), provider.id.clone());
                    let probe = probes.get(&key).cloned();
                    tasks.push(Box::pin(run_probe(
                        key,
                        provider.name.clone(),
                        probe,
                        self.probe_timeout,
                    )));
                }
            }
        }

        let outcomes = join_all(tasks).await;

        if abort.is_cancelled() {
            tracing::debug!("Probing pass aborted mid-flight; discarding results");
            return self.latest_snapshot();
        }

        let now = SystemTime::now();
        let mut transitions = Vec::new();
        let snapshot = {
            let mut state = self.state.lock();
            for outcome in &outcomes {
                let previous = state.get(&outcome.key);
                let previous_healthy = previous.map(|h| h.healthy);
                let carried_last_healthy = previous.and_then(|h| h.last_healthy);
                let previous_failures = previous.map(|h| h.consecutive_failures).unwrap_or(0);

                let record = ProviderHealth {
                    capability: outcome.key.0.clone(),
                    provider_id: outcome.key.1.clone(),
                    provider_name: outcome.provider_name.clone(),
                    healthy: outcome.healthy,
                    last_check: now,
                    last_healthy: if outcome.healthy {
                        Some(now)
                    } else {
                        carried_last_healthy
                    },
                    error: outcome.error.clone(),
                    response_time_ms: outcome.response_time_ms,
                    consecutive_failures: if outcome.healthy {
                        0
                    } else {
                        previous_failures + 1
                    },
                };

                // No event on the first-ever check: there is no previous
                // value to transition from.
                if let Some(previous_healthy) = previous_healthy
                    && previous_healthy != outcome.healthy
                {
                    transitions.push(HealthTransition {
                        capability: outcome.key.0.clone(),
                        provider_id: outcome.key.1.clone(),
                        provider_name: outcome.provider_name.clone(),
                        previous_healthy,
                        current_healthy: outcome.healthy,
                        error: outcome.error.clone(),
                    });
                }

                state.insert(outcome.key.clone(), record);
            }

            build_snapshot(now, &listing, &state)
        };

        let snapshot = Arc::new(snapshot);
        self.last_snapshot.store(Some(Arc::clone(&snapshot)));

        for transition in transitions {
            tracing::info!(
                capability = %transition.capability,
                provider_id = %transition.provider_id,
                healthy = transition.current_healthy,
                error = ?transition.error,
                "Provider health transition"
            );
            let _ = self.transitions.send(transition.clone());
            publish_best_effort(
                &*self.bus,
                RuntimeEvent::ProviderHealthChanged {
                    capability: transition.capability,
                    provider_id: transition.provider_id,
                    provider_name: transition.provider_name,
                    previous_healthy: transition.previous_healthy,
                    current_healthy: transition.current_healthy,
                    error: transition.error,
                },
            );
        }

        snapshot
    }

    /// Current health view without re-probing: stored state joined against
    /// the registry, with optimistic records for providers never probed.
    pub fn get_snapshot(&self) -> Arc<HealthSnapshot> {
        let listing = self.registry.capabilities_with_providers();
        let state = self.state.lock();
        Arc::new(build_snapshot(SystemTime::now(), &listing, &state))
    }

    /// Health of one capability, or `None` if the registry has never seen it
    pub fn get_capability_health(&self, capability: &CapabilityKind) -> Option<CapabilityHealth> {
        if !self.registry.has_capability(capability) {
            return None;
        }
        let providers = self.registry.get_providers(capability);
        let state = self.state.lock();
        Some(capability_health(
            capability,
            &providers,
            &state,
            SystemTime::now(),
        ))
    }

    /// Stored health record for one provider. `None` means it has never
    /// been probed (callers treat that as optimistically healthy).
    pub fn get_provider_health(
        &self,
        capability: &CapabilityKind,
        provider_id: &str,
    ) -> Option<ProviderHealth> {
        self.state
            .lock()
            .get(&(capability.clone(), provider_id.to_string()))
            .cloned()
    }

    fn latest_snapshot(&self) -> Arc<HealthSnapshot> {
        match self.last_snapshot.load_full() {
            Some(snapshot) => snapshot,
            None => self.get_snapshot(),
        }
    }
}

async fn run_probe(
    key: ProbeKey,
    provider_name: String,
    probe: Option<ProbeFn>,
    timeout: Duration,
) -> ProbeOutcome {
    let Some(probe) = probe else {
        // Optimistic default: a provider with no probe is assumed healthy.
        return ProbeOutcome {
            key,
            provider_name,
            healthy: true,
            error: None,
            response_time_ms: 0,
        };
    };

    let started = Instant::now();
    let guarded = AssertUnwindSafe(probe()).catch_unwind();
    let (healthy, error) = match tokio::time::timeout(timeout, guarded).await {
        Err(_) => (
            false,
            Some(format!("probe timed out after {}ms", timeout.as_millis())),
        ),
        Ok(Err(panic)) => (
            false,
            Some(format!("probe panicked: {}", panic_message(&panic))),
        ),
        Ok(Ok(Ok(healthy))) => (healthy, None),
        Ok(Ok(Err(e))) => (false, Some(format!("{e:#}"))),
    };

    ProbeOutcome {
        key,
        provider_name,
        healthy,
        error,
        response_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn capability_health(
    capability: &CapabilityKind,
    providers: &[Provider],
    state: &HashMap<ProbeKey, ProviderHealth>,
    now: SystemTime,
) -> CapabilityHealth {
    let records: Vec<ProviderHealth> = providers
        .iter()
        .map(|provider| {
            state
                .get(&(capability.clone(), provider.id.clone()))
                .cloned()
                .unwrap_or_else(|| optimistic_record(capability, provider, now))
        })
        .collect();
    let healthy_count = records.iter().filter(|r| r.healthy).count();
    CapabilityHealth {
        capability: capability.clone(),
        healthy: healthy_count > 0,
        healthy_count,
        total_count: records.len(),
        providers: records,
    }
}

fn build_snapshot(
    now: SystemTime,
    listing: &[(CapabilityKind, Vec<Provider>)],
    state: &HashMap<ProbeKey, ProviderHealth>,
) -> HealthSnapshot {
    let capabilities: Vec<CapabilityHealth> = listing
        .iter()
        .map(|(capability, providers)| capability_health(capability, providers, state, now))
        .collect();
    let overall_healthy = capabilities.iter().all(|c| c.healthy);
    HealthSnapshot {
        timestamp: now,
        capabilities,
        overall_healthy,
    }
}

fn optimistic_record(
    capability: &CapabilityKind,
    provider: &Provider,
    now: SystemTime,
) -> ProviderHealth {
    ProviderHealth {
        capability: capability.clone(),
        provider_id: provider.id.clone(),
        provider_name: provider.name.clone(),
        healthy: true,
        last_check: now,
        last_healthy: None,
        error: None,
        response_time_ms: 0,
        consecutive_failures: 0,
    }
}

/// Extract a human-readable message from a panic payload
fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (non-string payload)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventBus;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn setup() -> (Arc<CapabilityRegistry>, Arc<CapabilityHealthProber>) {
        let bus: Arc<dyn EventBus> = Arc::new(NullEventBus);
        let registry = Arc::new(CapabilityRegistry::new(bus.clone()));
        let prober = Arc::new(CapabilityHealthProber::new(
            registry.clone(),
            bus,
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        (registry, prober)
    }

    fn flag_probe(flag: Arc<AtomicBool>) -> ProbeFn {
        Arc::new(move || {
            let flag = flag.clone();
            Box::pin(async move { Ok(flag.load(Ordering::SeqCst)) })
        })
    }

    #[tokio::test]
    async fn test_provider_without_probe_is_optimistically_healthy() {
        let (registry, prober) = setup();
        let tts = CapabilityKind::new("tts");
        registry.register_provider(&tts, Provider::new("polly", "AWS Polly"));

        prober.check().await;

        let health = prober.get_provider_health(&tts, "polly").unwrap();
        assert!(health.healthy);
        assert_eq!(health.response_time_ms, 0);
        assert!(health.error.is_none());
    }

    #[tokio::test]
    async fn test_transition_fires_once_and_not_on_first_check() {
        let (registry, prober) = setup();
        let stt = CapabilityKind::new("stt");
        registry.register_provider(&stt, Provider::new("deepgram", "Deepgram"));

        let flag = Arc::new(AtomicBool::new(true));
        prober.register_probe(&stt, "deepgram", flag_probe(flag.clone()));

        let mut rx = prober.subscribe_transitions();

        prober.check().await;
        assert!(rx.try_recv().is_err(), "no event on first-ever check");

        flag.store(false, Ordering::SeqCst);
        prober.check().await;

        let transition = rx.try_recv().unwrap();
        assert!(transition.previous_healthy);
        assert!(!transition.current_healthy);
        assert!(rx.try_recv().is_err(), "exactly one transition event");
    }

    #[tokio::test]
    async fn test_probe_timeout_marks_unhealthy() {
        let (registry, prober) = setup();
        let tts = CapabilityKind::new("tts");
        registry.register_provider(&tts, Provider::new("slow", "Slow TTS"));
        prober.register_probe(
            &tts,
            "slow",
            Arc::new(|| Box::pin(std::future::pending::<anyhow::Result<bool>>())),
        );

        let started = Instant::now();
        prober.check().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let health = prober.get_provider_health(&tts, "slow").unwrap();
        assert!(!health.healthy);
        assert!(health.error.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_probe_error_degrades_only_that_provider() {
        let (registry, prober) = setup();
        let stt = CapabilityKind::new("stt");
        registry.register_provider(&stt, Provider::new("broken", "Broken"));
        registry.register_provider(&stt, Provider::new("fine", "Fine"));
        prober.register_probe(
            &stt,
            "broken",
            Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("connection refused")) })),
        );
        prober.register_probe(
            &stt,
            "fine",
            Arc::new(|| Box::pin(async { Ok(true) })),
        );

        let snapshot = prober.check().await;

        let broken = prober.get_provider_health(&stt, "broken").unwrap();
        assert!(!broken.healthy);
        assert!(broken.error.as_ref().unwrap().contains("connection refused"));
        assert!(prober.get_provider_health(&stt, "fine").unwrap().healthy);

        let stt_health = snapshot
            .capabilities
            .iter()
            .find(|c| c.capability == stt)
            .unwrap();
        assert!(stt_health.healthy);
        assert_eq!(stt_health.healthy_count, 1);
        assert_eq!(stt_health.total_count, 2);
    }

    #[tokio::test]
    async fn test_panicking_probe_is_contained() {
        let (registry, prober) = setup();
        let tts = CapabilityKind::new("tts");
        registry.register_provider(&tts, Provider::new("explosive", "Explosive"));
        prober.register_probe(
            &tts,
            "explosive",
            Arc::new(|| Box::pin(async { panic!("probe blew up") })),
        );

        prober.check().await;

        let health = prober.get_provider_health(&tts, "explosive").unwrap();
        assert!(!health.healthy);
        assert!(health.error.as_ref().unwrap().contains("probe blew up"));
    }

    #[tokio::test]
    async fn test_consecutive_failures_reset_on_recovery() {
        let (registry, prober) = setup();
        let stt = CapabilityKind::new("stt");
        registry.register_provider(&stt, Provider::new("d", "D"));
        let flag = Arc::new(AtomicBool::new(false));
        prober.register_probe(&stt, "d", flag_probe(flag.clone()));

        prober.check().await;
        prober.check().await;
        assert_eq!(
            prober
                .get_provider_health(&stt, "d")
                .unwrap()
                .consecutive_failures,
            2
        );

        flag.store(true, Ordering::SeqCst);
        prober.check().await;
        let health = prober.get_provider_health(&stt, "d").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_healthy.is_some());
    }

    #[tokio::test]
    async fn test_unregister_probe_deletes_state() {
        let (registry, prober) = setup();
        let stt = CapabilityKind::new("stt");
        registry.register_provider(&stt, Provider::new("d", "D"));
        prober.register_probe(&stt, "d", Arc::new(|| Box::pin(async { Ok(true) })));

        prober.check().await;
        assert!(prober.get_provider_health(&stt, "d").is_some());

        prober.unregister_probe(&stt, "d");
        assert!(prober.get_provider_health(&stt, "d").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_checks_run_exactly_one_pass() {
        let (registry, prober) = setup();
        let stt = CapabilityKind::new("stt");
        registry.register_provider(&stt, Provider::new("slow", "Slow"));

        let invocations = Arc::new(AtomicU32::new(0));
        let counter = invocations.clone();
        prober.register_probe(
            &stt,
            "slow",
            Arc::new(move || {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(true)
                })
            }),
        );

        let first = prober.check();
        let second = prober.check();
        let (a, b) = tokio::join!(first, second);

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        // Both callers resolve; the loser sees a (possibly empty) earlier view.
        assert!(!a.capabilities.is_empty());
        assert!(!b.capabilities.is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_halts() {
        let (_registry, prober) = setup();
        prober.start();
        prober.start();
        assert!(prober.is_running());
        prober.stop();
        assert!(!prober.is_running());
        // Stopping again is a no-op.
        prober.stop();
    }

    #[tokio::test]
    async fn test_snapshot_overall_health_requires_every_capability() {
        let (registry, prober) = setup();
        // Seeded capabilities have no providers, so they count as unhealthy.
        registry.register_provider(&CapabilityKind::new("tts"), Provider::new("p", "P"));

        let snapshot = prober.check().await;
        assert!(!snapshot.overall_healthy);
        let tts = snapshot
            .capabilities
            .iter()
            .find(|c| c.capability == CapabilityKind::new("tts"))
            .unwrap();
        assert!(tts.healthy);
    }
}

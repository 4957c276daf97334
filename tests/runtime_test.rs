//! End-to-End Runtime Tests
//!
//! Exercise the full load → register → resolve → drain → unload flow with
//! in-memory fake plugins, the way the daemon drives the runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use anima_runtime::capability::types::{CapabilityKind, CapabilityRequirement, Provider};
use anima_runtime::config::RuntimeConfig;
use anima_runtime::events::{BroadcastEventBus, EventEnvelope, RuntimeEvent};
use anima_runtime::plugin::lifecycle::{SwitchRequest, UnloadOptions};
use anima_runtime::plugin::loader::{DrainFuture, Plugin, PluginContext, StaticPluginLoader};
use anima_runtime::plugin::manifest::{InstalledPlugin, PluginManifest, StaticInstalledPlugins};

#[derive(Clone, Copy)]
enum DrainBehavior {
    None,
    Quick,
    Hang,
}

/// Configurable fake plugin: registers the given providers (with optional
/// fixed-result probes) and dependencies during init.
struct TestPlugin {
    name: &'static str,
    version: &'static str,
    providers: Vec<(CapabilityKind, Provider, Option<bool>)>,
    dependencies: Vec<CapabilityRequirement>,
    drain: DrainBehavior,
}

impl TestPlugin {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            version: "1.0.0",
            providers: Vec::new(),
            dependencies: Vec::new(),
            drain: DrainBehavior::None,
        }
    }

    fn with_provider(mut self, capability: &str, id: &str, name: &str, probe: Option<bool>) -> Self {
        self.providers
            .push((CapabilityKind::new(capability), Provider::new(id, name), probe));
        self
    }

    fn with_dependency(mut self, requirement: CapabilityRequirement) -> Self {
        self.dependencies.push(requirement);
        self
    }

    fn with_drain(mut self, drain: DrainBehavior) -> Self {
        self.drain = drain;
        self
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        self.version
    }

    async fn init(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        for (capability, provider, probe) in &self.providers {
            ctx.register_provider(capability, provider.clone());
            if let Some(healthy) = *probe {
                ctx.register_health_probe(
                    capability,
                    &provider.id,
                    Arc::new(move || Box::pin(async move { Ok(healthy) })),
                );
            }
        }
        if !self.dependencies.is_empty() {
            ctx.declare_dependencies(self.dependencies.clone());
        }
        Ok(())
    }

    fn on_drain(&self) -> Option<DrainFuture> {
        match self.drain {
            DrainBehavior::None => None,
            DrainBehavior::Quick => Some(Box::pin(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
            })),
            DrainBehavior::Hang => Some(Box::pin(std::future::pending())),
        }
    }
}

struct Harness {
    runtime: anima_runtime::runtime::PluginRuntime,
    loader: Arc<StaticPluginLoader>,
    installed: Arc<StaticInstalledPlugins>,
    bus: Arc<BroadcastEventBus>,
}

fn harness() -> Harness {
    let bus = Arc::new(BroadcastEventBus::new(64));
    let loader = Arc::new(StaticPluginLoader::new());
    let installed = Arc::new(StaticInstalledPlugins::new());
    let config = RuntimeConfig {
        probe_timeout_ms: 200,
        ..RuntimeConfig::default()
    };
    let runtime = anima_runtime::runtime::PluginRuntime::new(
        config,
        bus.clone(),
        loader.clone(),
        installed.clone(),
    );
    Harness {
        runtime,
        loader,
        installed,
        bus,
    }
}

/// Receive the next lifecycle event, skipping provider registration noise.
async fn next_lifecycle_event(
    rx: &mut tokio::sync::broadcast::Receiver<EventEnvelope>,
) -> RuntimeEvent {
    loop {
        let envelope = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        match envelope.event {
            RuntimeEvent::ProviderRegistered { .. }
            | RuntimeEvent::ProviderUnregistered { .. }
            | RuntimeEvent::ProviderHealthChanged { .. } => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn test_stt_failover_scenario() {
    let h = harness();
    h.loader.register(
        "transcribers",
        Arc::new(|| {
            Arc::new(
                TestPlugin::new("transcribers")
                    .with_provider("stt", "deepgram", "Deepgram", Some(false))
                    .with_provider("stt", "whisper-local", "Whisper (local)", Some(true)),
            )
        }),
    );

    let record = InstalledPlugin::new("transcribers", "1.0.0", "/opt/plugins/transcribers");
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();
    h.runtime.prober().check().await;

    let stt = CapabilityKind::new("stt");
    let all = h.runtime.resolver().resolve_all_providers(&stt);
    let ids: Vec<&str> = all.iter().map(|r| r.provider.id.as_str()).collect();
    assert_eq!(ids, vec!["whisper-local", "deepgram"]);

    let picked = h
        .runtime
        .resolver()
        .resolve_capability(&stt, &Default::default())
        .unwrap();
    assert_eq!(picked.provider.id, "whisper-local");
}

#[tokio::test]
async fn test_unload_reverses_every_registration() {
    let h = harness();
    h.loader.register(
        "voice",
        Arc::new(|| {
            Arc::new(
                TestPlugin::new("voice")
                    .with_provider("tts", "polly", "AWS Polly", Some(true))
                    .with_dependency(CapabilityRequirement::required("text-gen")),
            )
        }),
    );

    let record = InstalledPlugin::new("voice", "1.0.0", "/opt/plugins/voice");
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();

    let tts = CapabilityKind::new("tts");
    let text_gen = CapabilityKind::new("text-gen");
    assert!(h.runtime.registry().has_provider(&tts));
    assert_eq!(
        h.runtime.graph().get_affected_plugins(&text_gen),
        vec!["voice".to_string()]
    );

    h.runtime
        .lifecycle()
        .unload_plugin("voice", UnloadOptions::default())
        .await;

    assert!(!h.runtime.registry().has_provider(&tts));
    assert!(h.runtime.graph().get_affected_plugins(&text_gen).is_empty());
    assert!(h.runtime.prober().get_provider_health(&tts, "polly").is_none());
    assert!(h.runtime.lifecycle().get_plugin_state("voice").is_none());
}

#[tokio::test]
async fn test_hanging_drain_is_forced_within_timeout() {
    let h = harness();
    h.loader.register(
        "stubborn",
        Arc::new(|| Arc::new(TestPlugin::new("stubborn").with_drain(DrainBehavior::Hang))),
    );
    let mut rx = h.bus.subscribe();

    let record = InstalledPlugin::new("stubborn", "1.0.0", "/opt/plugins/stubborn");
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();

    let started = Instant::now();
    h.runtime
        .lifecycle()
        .unload_plugin(
            "stubborn",
            UnloadOptions::default().with_drain_timeout(Duration::from_millis(20)),
        )
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginActivated { .. }
    ));
    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginDraining { timeout_ms: 20, .. }
    ));
    match next_lifecycle_event(&mut rx).await {
        RuntimeEvent::PluginDrained { was_forced, .. } => assert!(was_forced),
        other => panic!("unexpected event: {other:?}"),
    }
    match next_lifecycle_event(&mut rx).await {
        RuntimeEvent::PluginDeactivated { was_forced, .. } => assert!(was_forced),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_quick_drain_completes_naturally() {
    let h = harness();
    h.loader.register(
        "polite",
        Arc::new(|| Arc::new(TestPlugin::new("polite").with_drain(DrainBehavior::Quick))),
    );
    let mut rx = h.bus.subscribe();

    let record = InstalledPlugin::new("polite", "1.0.0", "/opt/plugins/polite");
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();
    h.runtime
        .lifecycle()
        .unload_plugin("polite", UnloadOptions::default())
        .await;

    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginActivated { .. }
    ));
    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginDraining { .. }
    ));
    match next_lifecycle_event(&mut rx).await {
        RuntimeEvent::PluginDrained { was_forced, .. } => assert!(!was_forced),
        other => panic!("unexpected event: {other:?}"),
    }
    match next_lifecycle_event(&mut rx).await {
        RuntimeEvent::PluginDeactivated { was_forced, .. } => assert!(!was_forced),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_manifest_declared_drain_without_hook() {
    let h = harness();
    h.loader.register(
        "declared",
        Arc::new(|| Arc::new(TestPlugin::new("declared"))),
    );
    let mut rx = h.bus.subscribe();

    let manifest = PluginManifest::new("declared", "1.0.0").with_drain(Some(1_500));
    let record =
        InstalledPlugin::new("declared", "1.0.0", "/opt/plugins/declared").with_manifest(manifest);
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();
    h.runtime
        .lifecycle()
        .unload_plugin("declared", UnloadOptions::default())
        .await;

    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginActivated { .. }
    ));
    // The manifest timeout override shows up in the draining event, and the
    // hook-less drain closes immediately without force.
    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginDraining {
            timeout_ms: 1_500,
            ..
        }
    ));
    match next_lifecycle_event(&mut rx).await {
        RuntimeEvent::PluginDrained { was_forced, .. } => assert!(!was_forced),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_forced_unload_skips_drain() {
    let h = harness();
    h.loader.register(
        "stubborn",
        Arc::new(|| Arc::new(TestPlugin::new("stubborn").with_drain(DrainBehavior::Hang))),
    );
    let mut rx = h.bus.subscribe();

    let record = InstalledPlugin::new("stubborn", "1.0.0", "/opt/plugins/stubborn");
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();
    h.runtime
        .lifecycle()
        .unload_plugin("stubborn", UnloadOptions::forced())
        .await;

    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginActivated { .. }
    ));
    // Straight to deactivation: no draining/drained events.
    assert!(matches!(
        next_lifecycle_event(&mut rx).await,
        RuntimeEvent::PluginDeactivated { .. }
    ));
}

#[tokio::test]
async fn test_switch_provider_hands_over_capability() {
    let h = harness();
    h.loader.register(
        "tts-polly",
        Arc::new(|| {
            Arc::new(TestPlugin::new("tts-polly").with_provider("tts", "polly", "AWS Polly", None))
        }),
    );
    h.loader.register(
        "tts-openai",
        Arc::new(|| {
            Arc::new(TestPlugin::new("tts-openai").with_provider("tts", "openai", "OpenAI TTS", None))
        }),
    );
    h.installed
        .insert(InstalledPlugin::new("tts-openai", "1.0.0", "/opt/plugins/tts-openai"));

    let record = InstalledPlugin::new("tts-polly", "1.0.0", "/opt/plugins/tts-polly");
    h.runtime.lifecycle().load_plugin(&record).await.unwrap();

    h.runtime
        .lifecycle()
        .switch_provider(&SwitchRequest {
            capability: CapabilityKind::new("tts"),
            from_plugin: "tts-polly".to_string(),
            to_plugin: "tts-openai".to_string(),
        })
        .await
        .unwrap();

    let tts = CapabilityKind::new("tts");
    assert!(h.runtime.registry().get_provider(&tts, "polly").is_none());
    assert!(h.runtime.registry().get_provider(&tts, "openai").is_some());
    assert!(h.runtime.lifecycle().get_plugin_state("tts-polly").is_none());
    assert_eq!(
        h.runtime.lifecycle().loaded_plugins(),
        vec!["tts-openai".to_string()]
    );
}

#[tokio::test]
async fn test_runtime_shutdown_unloads_everything() {
    let h = harness();
    h.loader.register(
        "a",
        Arc::new(|| Arc::new(TestPlugin::new("a").with_provider("tts", "pa", "PA", None))),
    );
    h.loader.register(
        "b",
        Arc::new(|| Arc::new(TestPlugin::new("b").with_provider("stt", "pb", "PB", None))),
    );

    h.runtime
        .lifecycle()
        .load_plugin(&InstalledPlugin::new("a", "1.0.0", "/opt/plugins/a"))
        .await
        .unwrap();
    h.runtime
        .lifecycle()
        .load_plugin(&InstalledPlugin::new("b", "1.0.0", "/opt/plugins/b"))
        .await
        .unwrap();
    h.runtime.start();

    h.runtime.shutdown().await;

    assert!(h.runtime.lifecycle().loaded_plugins().is_empty());
    assert!(!h.runtime.prober().is_running());
    assert!(!h.runtime.registry().has_provider(&CapabilityKind::new("tts")));
    assert!(!h.runtime.registry().has_provider(&CapabilityKind::new("stt")));
}

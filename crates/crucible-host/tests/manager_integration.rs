//! End-to-end scenarios through the manager facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crucible_core::{
    ArtifactEvent, ArtifactHandle, BoxedPlugin, ExtensionDecl, HookResult, LIFECYCLE_TAG,
    LifecycleEvent, LoaderContext, Plugin, PluginLoader, PluginMetadata, PluginResult,
    PluginState,
};
use crucible_host::{
    HealthSettings, HotDeployCoordinator, HotDeploySettings, ManagerSettings, PluginManager,
};

/// Rendering contract used by the extension tests.
trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;
}

struct NamedRenderer(&'static str);

impl Renderer for NamedRenderer {
    fn name(&self) -> &'static str {
        self.0
    }
}

type RendererHandle = Arc<dyn Renderer>;

struct TestPlugin {
    metadata: PluginMetadata,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    extensions: Vec<(String, &'static str, i32)>,
}

impl TestPlugin {
    fn new(id: &str, version: &str, deps: &[&str]) -> Arc<Self> {
        let mut builder = PluginMetadata::builder(id, id, version);
        for dep in deps {
            builder = builder.dependency(dep).unwrap();
        }
        Arc::new(Self {
            metadata: builder.build(),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            extensions: Vec::new(),
        })
    }

    fn with_renderer(id: &str, point: &str, name: &'static str, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            metadata: PluginMetadata::builder(id, id, "1.0.0").build(),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            extensions: vec![(point.to_string(), name, priority)],
        })
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn initialize(&self) -> HookResult {
        Ok(())
    }

    async fn start(&self) -> HookResult {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err("start refused".into());
        }
        Ok(())
    }

    async fn stop(&self) -> HookResult {
        Ok(())
    }

    fn extensions(&self) -> Vec<ExtensionDecl> {
        self.extensions
            .iter()
            .map(|(point, name, priority)| {
                ExtensionDecl::new(
                    point.clone(),
                    Arc::new(NamedRenderer(name)) as RendererHandle,
                    *priority,
                )
            })
            .collect()
    }
}

async fn manager(settings: ManagerSettings) -> Arc<PluginManager> {
    let manager = PluginManager::new(settings);
    manager.initialize().await.unwrap();
    manager
}

fn quiet_settings() -> ManagerSettings {
    ManagerSettings {
        health: HealthSettings {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn transitive_start_orders_lifecycle_events() {
    let manager = manager(quiet_settings()).await;
    let mut events = manager.bus().subscribe_tag(LIFECYCLE_TAG).unwrap();

    manager.install(TestPlugin::new("a", "1.0.0", &[])).await.unwrap();
    manager
        .install(TestPlugin::new("b", "1.0.0", &["a>=1.0.0"]))
        .await
        .unwrap();
    manager.install(TestPlugin::new("c", "1.0.0", &["b"])).await.unwrap();

    manager.start("c").await.unwrap();

    let mut transitions = Vec::new();
    for _ in 0..6 {
        let event = events.recv().await.unwrap();
        let lifecycle: &LifecycleEvent = event.downcast_ref().unwrap();
        transitions.push((lifecycle.plugin_id.clone(), lifecycle.new_state));
    }

    assert_eq!(
        transitions[..3],
        [
            ("a".to_string(), PluginState::Initialized),
            ("b".to_string(), PluginState::Initialized),
            ("c".to_string(), PluginState::Initialized),
        ]
    );
    assert_eq!(
        transitions[3..],
        [
            ("a".to_string(), PluginState::Started),
            ("b".to_string(), PluginState::Started),
            ("c".to_string(), PluginState::Started),
        ]
    );
}

#[tokio::test]
async fn transitive_stop_reverses_order() {
    let manager = manager(quiet_settings()).await;
    manager.install(TestPlugin::new("a", "1.0.0", &[])).await.unwrap();
    manager.install(TestPlugin::new("b", "1.0.0", &["a"])).await.unwrap();
    manager.install(TestPlugin::new("c", "1.0.0", &["b"])).await.unwrap();
    manager.start("c").await.unwrap();

    let mut events = manager.bus().subscribe_tag(LIFECYCLE_TAG).unwrap();
    manager.stop("a").await.unwrap();

    let mut stopped = Vec::new();
    for _ in 0..3 {
        let event = events.recv().await.unwrap();
        let lifecycle: &LifecycleEvent = event.downcast_ref().unwrap();
        assert_eq!(lifecycle.new_state, PluginState::Stopped);
        stopped.push(lifecycle.plugin_id.clone());
    }
    assert_eq!(stopped, ["c", "b", "a"]);
}

#[tokio::test]
async fn resolver_errors_surface_unchanged() {
    let manager = manager(quiet_settings()).await;
    manager.install(TestPlugin::new("a", "1.0.0", &["b"])).await.unwrap();
    manager.install(TestPlugin::new("b", "1.0.0", &["a"])).await.unwrap();

    let err = manager.start("a").await.unwrap_err();
    assert!(matches!(
        err,
        crucible_core::PluginError::CircularDependency { .. }
    ));
}

#[tokio::test]
async fn provided_extensions_follow_plugin_lifetime() {
    let manager = manager(quiet_settings()).await;
    manager
        .extensions()
        .register_point::<RendererHandle>("render", true)
        .unwrap();

    manager
        .install(TestPlugin::with_renderer("x", "render", "x-renderer", 100))
        .await
        .unwrap();
    manager
        .install(TestPlugin::with_renderer("y", "render", "y-renderer", 200))
        .await
        .unwrap();
    manager
        .install(TestPlugin::with_renderer("z", "render", "z-renderer", 50))
        .await
        .unwrap();
    for id in ["x", "y", "z"] {
        manager.start(id).await.unwrap();
    }

    let names: Vec<&str> = manager
        .extensions()
        .extensions_of::<RendererHandle>("render")
        .unwrap()
        .iter()
        .map(|r| r.name())
        .collect();
    assert_eq!(names, ["y-renderer", "x-renderer", "z-renderer"]);
    assert_eq!(
        manager
            .extensions()
            .highest_priority::<RendererHandle>("render")
            .unwrap()
            .unwrap()
            .name(),
        "y-renderer"
    );

    // Restarting must not duplicate entries.
    manager.stop("y").await.unwrap();
    manager.start("y").await.unwrap();
    assert_eq!(manager.extensions().extension_count("render").unwrap(), 3);

    // Uninstalling withdraws the plugin's entries.
    manager.uninstall("y").await.unwrap();
    let names: Vec<&str> = manager
        .extensions()
        .extensions_of::<RendererHandle>("render")
        .unwrap()
        .iter()
        .map(|r| r.name())
        .collect();
    assert_eq!(names, ["x-renderer", "z-renderer"]);
}

#[tokio::test]
async fn registry_size_matches_installs_minus_uninstalls() {
    let manager = manager(quiet_settings()).await;
    for id in ["a", "b", "c"] {
        manager.install(TestPlugin::new(id, "1.0.0", &[])).await.unwrap();
    }
    manager.uninstall("b").await.unwrap();

    let stats = manager.stats().await;
    assert_eq!(stats.total, 2);
    assert!(manager.descriptor("b").await.is_none());

    // A fresh install under the freed id is allowed again.
    manager.install(TestPlugin::new("b", "2.0.0", &[])).await.unwrap();
    assert_eq!(manager.stats().await.total, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_recovery_stops_at_the_attempt_cap() {
    let settings = ManagerSettings {
        auto_start: false,
        health: HealthSettings {
            enabled: true,
            interval: Duration::from_millis(40),
            auto_recovery: true,
            max_recovery_attempts: 2,
        },
        ..Default::default()
    };
    let manager = manager(settings).await;

    let plugin = TestPlugin::new("flaky", "1.0.0", &[]);
    plugin.fail_start.store(true, Ordering::SeqCst);
    manager.install(Arc::clone(&plugin) as BoxedPlugin).await.unwrap();
    let _ = manager.start("flaky").await;
    assert_eq!(
        manager.descriptor("flaky").await.unwrap().state,
        PluginState::Failed
    );
    let manual_starts = plugin.starts.load(Ordering::SeqCst);

    // Let the monitor tick well past the attempt budget.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let recovery_starts = plugin.starts.load(Ordering::SeqCst) - manual_starts;
    assert_eq!(recovery_starts, 2);
    assert_eq!(
        manager.descriptor("flaky").await.unwrap().state,
        PluginState::Failed
    );

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_plugins_and_gates_operations() {
    let manager = manager(quiet_settings()).await;
    manager.install(TestPlugin::new("a", "1.0.0", &[])).await.unwrap();
    manager.install(TestPlugin::new("b", "1.0.0", &["a"])).await.unwrap();
    manager.start("b").await.unwrap();

    manager.shutdown().await.unwrap();

    assert!(matches!(
        manager.install(TestPlugin::new("c", "1.0.0", &[])).await,
        Err(crucible_core::PluginError::Shutdown)
    ));
    assert!(matches!(
        manager.start("a").await,
        Err(crucible_core::PluginError::Shutdown)
    ));
}

// ─── Hot deployment ─────────────────────────────────────────────────────

struct MapLoader;

#[async_trait]
impl PluginLoader for MapLoader {
    fn name(&self) -> &str {
        "map-loader"
    }

    async fn load(
        &self,
        handle: &ArtifactHandle,
        _ctx: &LoaderContext,
    ) -> PluginResult<BoxedPlugin> {
        // Artifact key doubles as the plugin id.
        Ok(TestPlugin::new(&handle.key, "1.0.0", &[]))
    }
}

#[tokio::test]
async fn watcher_events_drive_install_and_uninstall() {
    let settings = ManagerSettings {
        auto_start: true,
        health: HealthSettings {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let manager = manager(settings).await;
    let coordinator = HotDeployCoordinator::new(
        Arc::clone(&manager),
        Arc::new(MapLoader),
        HotDeploySettings {
            enabled: true,
            ..Default::default()
        },
    );

    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&coordinator).run(rx, cancel.clone()));

    let artifact = ArtifactHandle::new("greeter");
    tx.send(ArtifactEvent::Created(artifact.clone())).await.unwrap();
    tx.send(ArtifactEvent::Modified(artifact.clone())).await.unwrap();
    tx.send(ArtifactEvent::Deleted(artifact.clone())).await.unwrap();
    drop(tx);
    task.await.unwrap();

    // Created installed and auto-started it, Modified reinstalled it,
    // Deleted removed it.
    assert!(manager.descriptor("greeter").await.is_none());
    assert!(coordinator.plugin_for("greeter").is_none());
}

#[tokio::test]
async fn created_event_installs_and_starts() {
    let settings = ManagerSettings {
        auto_start: true,
        health: HealthSettings {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let manager = manager(settings).await;
    let coordinator = HotDeployCoordinator::new(
        Arc::clone(&manager),
        Arc::new(MapLoader),
        HotDeploySettings {
            enabled: true,
            ..Default::default()
        },
    );

    coordinator
        .handle(ArtifactEvent::Created(ArtifactHandle::new("greeter")))
        .await;

    let descriptor = manager.descriptor("greeter").await.unwrap();
    assert_eq!(descriptor.state, PluginState::Started);
    assert_eq!(descriptor.location.as_deref(), Some("greeter"));
    assert_eq!(coordinator.plugin_for("greeter").as_deref(), Some("greeter"));
}

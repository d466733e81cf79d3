//! Health monitoring with bounded auto-recovery.
//!
//! The monitor ticks on its own task: it enumerates all plugins, probes
//! those that expose a health indicator, synthesizes records from the
//! lifecycle state for the rest, caches the result, and publishes a
//! health event per plugin. When auto-recovery is on, a `DOWN` plugin is
//! restarted through the [`RecoveryHandler`] until the attempt budget is
//! spent; the counter resets once a restart succeeds or the status comes
//! back `UP`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crucible_bus::EventBus;
use crucible_core::{
    BoxedEvent, HealthEvent, HealthRecord, HealthStatus, PluginDescriptor, PluginResult,
    PluginState, RECOVERY_ATTEMPTS_KEY,
};

use crate::registry::LifecycleRegistry;

/// Receives restart requests from the monitor. Implemented by the
/// manager facade.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    /// Restarts the plugin (stop, then start).
    async fn restart(&self, plugin_id: &str) -> PluginResult<()>;
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// Whether the monitor runs at all.
    pub enabled: bool,
    /// Tick period.
    pub interval: Duration,
    /// Whether `DOWN` plugins are restarted automatically.
    pub auto_recovery: bool,
    /// Consecutive failed restarts tolerated per plugin.
    pub max_recovery_attempts: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            auto_recovery: true,
            max_recovery_attempts: 3,
        }
    }
}

/// Periodic health prober with cached records.
pub struct HealthMonitor {
    registry: Arc<LifecycleRegistry>,
    bus: Arc<EventBus>,
    settings: HealthSettings,
    cache: RwLock<HashMap<String, HealthRecord>>,
    attempts: Mutex<HashMap<String, u32>>,
    cancel: Mutex<Option<CancellationToken>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Creates a monitor over the given registry and bus.
    pub fn new(
        registry: Arc<LifecycleRegistry>,
        bus: Arc<EventBus>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            registry,
            bus,
            settings,
            cache: RwLock::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            cancel: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Begins periodic probing. No-op when disabled or already running.
    pub async fn start(self: &Arc<Self>, handler: Arc<dyn RecoveryHandler>) {
        if !self.settings.enabled {
            debug!("Health monitoring disabled");
            return;
        }
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let monitor = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.settings.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => monitor.tick(&handler).await,
                }
            }
        }));
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            auto_recovery = self.settings.auto_recovery,
            "Health monitor started"
        );
    }

    /// Cancels the tick loop and waits for the current tick to finish.
    pub async fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
            info!("Health monitor stopped");
        }
    }

    /// Runs one probing pass over every registered plugin.
    ///
    /// Exposed for deterministic driving in tests and manual probes.
    pub async fn tick(&self, handler: &Arc<dyn RecoveryHandler>) {
        for descriptor in self.registry.descriptors().await {
            let id = descriptor.id().to_string();
            let mut record = self.probe(&descriptor).await;

            match record.status {
                HealthStatus::Up => {
                    self.attempts.lock().remove(&id);
                }
                HealthStatus::Down => {
                    record.details.insert(
                        RECOVERY_ATTEMPTS_KEY.to_string(),
                        serde_json::json!(self.attempt_count(&id)),
                    );
                }
                _ => {}
            }

            self.cache.write().insert(id.clone(), record.clone());
            if let Err(e) = self
                .bus
                .publish(BoxedEvent::new(HealthEvent::new(record.clone())))
                .await
            {
                warn!(plugin = %id, error = %e, "Failed to publish health event");
            }

            if self.settings.auto_recovery && record.status == HealthStatus::Down {
                self.try_recover(&id, handler).await;
            }
        }
    }

    /// Cached record for one plugin.
    pub fn health_of(&self, plugin_id: &str) -> Option<HealthRecord> {
        self.cache.read().get(plugin_id).cloned()
    }

    /// All cached records.
    pub fn all_health(&self) -> Vec<HealthRecord> {
        self.cache.read().values().cloned().collect()
    }

    /// Clears the recovery counter for a plugin, re-arming auto-recovery
    /// after the budget was spent.
    pub fn reset_attempts(&self, plugin_id: &str) {
        self.attempts.lock().remove(plugin_id);
    }

    async fn probe(&self, descriptor: &PluginDescriptor) -> HealthRecord {
        let id = descriptor.id();
        if let Some(plugin) = self.registry.plugin(id).await
            && let Some(indicator) = plugin.health_indicator()
        {
            return match indicator.health().await {
                Ok(record) => record,
                Err(e) => HealthRecord::down(id, e.to_string()),
            };
        }
        Self::synthesize(id, descriptor.state)
    }

    fn synthesize(id: &str, state: PluginState) -> HealthRecord {
        match state {
            PluginState::Started => HealthRecord::up(id, "Plugin is running"),
            PluginState::Stopped => HealthRecord::down(id, "Plugin is stopped"),
            PluginState::Failed => HealthRecord::down(id, "Plugin failed to start"),
            _ => HealthRecord::unknown(id, format!("Plugin is {state}")),
        }
    }

    fn attempt_count(&self, id: &str) -> u32 {
        self.attempts.lock().get(id).copied().unwrap_or(0)
    }

    async fn try_recover(&self, id: &str, handler: &Arc<dyn RecoveryHandler>) {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let counter = attempts.entry(id.to_string()).or_insert(0);
            if *counter >= self.settings.max_recovery_attempts {
                debug!(
                    plugin = %id,
                    attempts = *counter,
                    "Recovery attempts exhausted, leaving plugin DOWN"
                );
                return;
            }
            *counter += 1;
            *counter
        };

        info!(
            plugin = %id,
            attempt,
            max = self.settings.max_recovery_attempts,
            "Attempting automatic recovery"
        );
        match handler.restart(id).await {
            Ok(()) => {
                self.attempts.lock().remove(id);
                info!(plugin = %id, "Automatic recovery succeeded");
            }
            Err(e) => {
                warn!(plugin = %id, attempt, error = %e, "Automatic recovery failed");
            }
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("settings", &self.settings)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crucible_core::{
        HookError, HookResult, Plugin, PluginError, PluginMetadata,
    };

    use crate::extensions::ExtensionRegistry;

    struct InertPlugin {
        metadata: PluginMetadata,
        health: Option<HealthStatus>,
        probe_fails: bool,
    }

    impl InertPlugin {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                metadata: PluginMetadata::builder(id, id, "1.0.0").build(),
                health: None,
                probe_fails: false,
            })
        }

        fn with_indicator(id: &str, status: HealthStatus) -> Arc<Self> {
            Arc::new(Self {
                metadata: PluginMetadata::builder(id, id, "1.0.0").build(),
                health: Some(status),
                probe_fails: false,
            })
        }

        fn with_failing_probe(id: &str) -> Arc<Self> {
            Arc::new(Self {
                metadata: PluginMetadata::builder(id, id, "1.0.0").build(),
                health: None,
                probe_fails: true,
            })
        }
    }

    #[async_trait]
    impl crucible_core::HealthIndicator for InertPlugin {
        async fn health(&self) -> Result<HealthRecord, HookError> {
            if self.probe_fails {
                return Err("probe exploded".into());
            }
            Ok(HealthRecord::new(
                self.metadata.id.clone(),
                self.health.unwrap(),
                "custom probe",
            ))
        }
    }

    #[async_trait]
    impl Plugin for InertPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }
        async fn initialize(&self) -> HookResult {
            Ok(())
        }
        async fn start(&self) -> HookResult {
            Ok(())
        }
        async fn stop(&self) -> HookResult {
            Ok(())
        }
        fn health_indicator(&self) -> Option<&dyn crucible_core::HealthIndicator> {
            if self.health.is_some() || self.probe_fails {
                Some(self)
            } else {
                None
            }
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
        succeed: bool,
        registry: Arc<LifecycleRegistry>,
    }

    #[async_trait]
    impl RecoveryHandler for CountingHandler {
        async fn restart(&self, plugin_id: &str) -> PluginResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                self.registry.stop(plugin_id).await?;
                self.registry.start(plugin_id).await
            } else {
                Err(PluginError::hook(plugin_id, "start", "still broken"))
            }
        }
    }

    async fn setup(settings: HealthSettings) -> (Arc<LifecycleRegistry>, Arc<HealthMonitor>) {
        let bus = Arc::new(EventBus::in_process());
        bus.initialize().await.unwrap();
        let registry = Arc::new(LifecycleRegistry::new(
            Arc::clone(&bus),
            Arc::new(ExtensionRegistry::new()),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            bus,
            settings,
        ));
        (registry, monitor)
    }

    fn handler(registry: &Arc<LifecycleRegistry>, succeed: bool) -> Arc<CountingHandler> {
        Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            succeed,
            registry: Arc::clone(registry),
        })
    }

    #[tokio::test]
    async fn synthesizes_from_state() {
        let (registry, monitor) = setup(HealthSettings {
            auto_recovery: false,
            ..Default::default()
        })
        .await;
        registry.register(InertPlugin::new("p1"), None).await.unwrap();
        registry.start("p1").await.unwrap();

        let h = handler(&registry, false);
        monitor.tick(&(h as Arc<dyn RecoveryHandler>)).await;

        let record = monitor.health_of("p1").unwrap();
        assert_eq!(record.status, HealthStatus::Up);

        registry.stop("p1").await.unwrap();
        let h = handler(&registry, false);
        monitor.tick(&(h as Arc<dyn RecoveryHandler>)).await;
        let record = monitor.health_of("p1").unwrap();
        assert_eq!(record.status, HealthStatus::Down);
        assert_eq!(record.message, "Plugin is stopped");
    }

    #[tokio::test]
    async fn custom_indicator_wins_over_state() {
        let (registry, monitor) = setup(HealthSettings {
            auto_recovery: false,
            ..Default::default()
        })
        .await;
        registry
            .register(
                InertPlugin::with_indicator("p1", HealthStatus::Degraded),
                None,
            )
            .await
            .unwrap();
        registry.start("p1").await.unwrap();

        let h = handler(&registry, false);
        monitor.tick(&(h as Arc<dyn RecoveryHandler>)).await;
        assert_eq!(
            monitor.health_of("p1").unwrap().status,
            HealthStatus::Degraded
        );
    }

    #[tokio::test]
    async fn probe_error_becomes_down_record() {
        let (registry, monitor) = setup(HealthSettings {
            auto_recovery: false,
            ..Default::default()
        })
        .await;
        registry
            .register(InertPlugin::with_failing_probe("p1"), None)
            .await
            .unwrap();
        registry.register(InertPlugin::new("p2"), None).await.unwrap();
        registry.start("p2").await.unwrap();

        let h = handler(&registry, false);
        monitor.tick(&(h as Arc<dyn RecoveryHandler>)).await;

        let record = monitor.health_of("p1").unwrap();
        assert_eq!(record.status, HealthStatus::Down);
        assert!(record.message.contains("probe exploded"));
        // The tick continued past the failing probe.
        assert_eq!(monitor.health_of("p2").unwrap().status, HealthStatus::Up);
    }

    #[tokio::test]
    async fn recovery_respects_attempt_budget() {
        let (registry, monitor) = setup(HealthSettings {
            max_recovery_attempts: 2,
            ..Default::default()
        })
        .await;
        registry.register(InertPlugin::new("p1"), None).await.unwrap();
        registry.start("p1").await.unwrap();
        registry.stop("p1").await.unwrap();
        // STOPPED synthesizes DOWN; the failing handler keeps it there.
        let h = handler(&registry, false);
        let dyn_handler: Arc<dyn RecoveryHandler> = h.clone();

        monitor.tick(&dyn_handler).await;
        monitor.tick(&dyn_handler).await;
        monitor.tick(&dyn_handler).await;

        // Ticks 1 and 2 attempted recovery; tick 3 did not.
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);

        // An external reset re-arms recovery.
        monitor.reset_attempts("p1");
        monitor.tick(&dyn_handler).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn successful_recovery_resets_counter() {
        let (registry, monitor) = setup(HealthSettings {
            max_recovery_attempts: 2,
            ..Default::default()
        })
        .await;
        registry.register(InertPlugin::new("p1"), None).await.unwrap();
        registry.start("p1").await.unwrap();
        registry.stop("p1").await.unwrap();
        // STOPPED synthesizes DOWN; a successful restart moves it to STARTED.
        let h = handler(&registry, true);
        let dyn_handler: Arc<dyn RecoveryHandler> = h.clone();

        monitor.tick(&dyn_handler).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.attempt_count("p1"), 0);

        monitor.tick(&dyn_handler).await;
        // Now UP; no further recovery.
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.health_of("p1").unwrap().status, HealthStatus::Up);
    }

    #[tokio::test]
    async fn down_records_carry_attempt_counter() {
        let (registry, monitor) = setup(HealthSettings {
            max_recovery_attempts: 1,
            ..Default::default()
        })
        .await;
        registry.register(InertPlugin::new("p1"), None).await.unwrap();
        registry.start("p1").await.unwrap();
        registry.stop("p1").await.unwrap();
        let h = handler(&registry, false);
        let dyn_handler: Arc<dyn RecoveryHandler> = h.clone();

        monitor.tick(&dyn_handler).await;
        monitor.tick(&dyn_handler).await;

        let record = monitor.health_of("p1").unwrap();
        assert_eq!(record.recovery_attempts(), Some(1));
    }
}

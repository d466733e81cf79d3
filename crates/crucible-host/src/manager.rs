//! Plugin manager facade.
//!
//! [`PluginManager`] composes the bus, extension registry, resolver,
//! lifecycle registry and health monitor behind one surface, and is the
//! only injected root: all runtime state lives inside it.
//!
//! Subsystems start in the order bus → registries → monitor and shut
//! down in reverse, with the monitor drained before plugins are stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crucible_bus::{BusStats, EventBus};
use crucible_core::{
    ArtifactHandle, BoxedPlugin, ConfigMap, HealthRecord, LoaderContext, PluginDescriptor,
    PluginError, PluginLoader, PluginResult, PluginState, ResourceBudget,
};

use crate::extensions::ExtensionRegistry;
use crate::health::{HealthMonitor, HealthSettings, RecoveryHandler};
use crate::registry::LifecycleRegistry;
use crate::resolver;

/// Facade configuration.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Start plugins right after installation.
    pub auto_start: bool,
    /// Make `start`/`stop` operate on the transitive closure computed by
    /// the resolver instead of the single plugin.
    pub transitive_control: bool,
    /// Per-hook timeout applied by the lifecycle registry.
    pub hook_timeout: std::time::Duration,
    /// Health monitor configuration.
    pub health: HealthSettings,
    /// Per-subscription bus buffer capacity.
    pub subscription_capacity: usize,
    /// Advisory resource hints handed to loaders.
    pub resources: ResourceBudget,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            transitive_control: true,
            hook_timeout: crate::registry::DEFAULT_HOOK_TIMEOUT,
            health: HealthSettings::default(),
            subscription_capacity: crucible_bus::DEFAULT_SUBSCRIPTION_CAPACITY,
            resources: ResourceBudget::default(),
        }
    }
}

/// Counters describing manager state.
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    /// Registered plugins, any state.
    pub total: usize,
    /// Plugins in `STARTED`.
    pub started: usize,
    /// Plugins in `STOPPED`.
    pub stopped: usize,
    /// Plugins in `FAILED`.
    pub failed: usize,
    /// Bus counters.
    pub bus: BusStats,
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plugins: {} total ({} started, {} stopped, {} failed); {}",
            self.total, self.started, self.stopped, self.failed, self.bus
        )
    }
}

/// The outward-facing surface of the plugin runtime.
pub struct PluginManager {
    bus: Arc<EventBus>,
    extensions: Arc<ExtensionRegistry>,
    registry: Arc<LifecycleRegistry>,
    monitor: Arc<HealthMonitor>,
    settings: ManagerSettings,
    shut_down: AtomicBool,
}

impl PluginManager {
    /// Creates a manager over the in-process bus.
    pub fn new(settings: ManagerSettings) -> Arc<Self> {
        let bus = Arc::new(
            EventBus::in_process().subscription_capacity(settings.subscription_capacity),
        );
        Self::with_bus(settings, bus)
    }

    /// Creates a manager over an externally-constructed bus (e.g. with
    /// the broker transport).
    pub fn with_bus(settings: ManagerSettings, bus: Arc<EventBus>) -> Arc<Self> {
        let extensions = Arc::new(ExtensionRegistry::new());
        let registry = Arc::new(
            LifecycleRegistry::new(Arc::clone(&bus), Arc::clone(&extensions))
                .hook_timeout(settings.hook_timeout),
        );
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            settings.health.clone(),
        ));
        Arc::new(Self {
            bus,
            extensions,
            registry,
            monitor,
            settings,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Initializes subsystems: bus first, then the monitor.
    pub async fn initialize(self: &Arc<Self>) -> PluginResult<()> {
        self.bus.initialize().await?;
        let handler: Arc<dyn RecoveryHandler> = Arc::clone(self) as Arc<dyn RecoveryHandler>;
        self.monitor.start(handler).await;
        info!("Plugin manager initialized");
        Ok(())
    }

    // ─── Installation ────────────────────────────────────────────────────

    /// Registers a plugin instance; starts it when auto-start is on.
    pub async fn install(self: &Arc<Self>, plugin: BoxedPlugin) -> PluginResult<PluginDescriptor> {
        self.install_located(plugin, None).await
    }

    /// Registers a plugin with an opaque location string attached to its
    /// descriptor.
    pub async fn install_located(
        self: &Arc<Self>,
        plugin: BoxedPlugin,
        location: Option<String>,
    ) -> PluginResult<PluginDescriptor> {
        self.ensure_live()?;
        let descriptor = self.registry.register(plugin, location).await?;
        if self.settings.auto_start {
            self.start(descriptor.id()).await?;
        }
        Ok(descriptor)
    }

    /// Loads an artifact through a loader and installs the result.
    pub async fn install_from(
        self: &Arc<Self>,
        loader: &dyn PluginLoader,
        handle: &ArtifactHandle,
    ) -> PluginResult<PluginDescriptor> {
        self.ensure_live()?;
        let ctx = LoaderContext::new(self.settings.resources);
        let plugin = loader.load(handle, &ctx).await?;
        self.install_located(plugin, handle.location.clone()).await
    }

    /// Unregisters a plugin, stopping it first if it is running.
    pub async fn uninstall(&self, id: &str) -> PluginResult<PluginDescriptor> {
        self.ensure_live()?;
        if self.registry.descriptor(id).await.map(|d| d.state) == Some(PluginState::Started) {
            if let Err(e) = self.registry.stop(id).await {
                warn!(plugin = %id, error = %e, "Stop before uninstall failed");
            }
        }
        self.registry.unregister(id).await
    }

    // ─── Lifecycle control ───────────────────────────────────────────────

    /// Starts a plugin; with transitive control, its prerequisites start
    /// first, in dependency order.
    pub async fn start(&self, id: &str) -> PluginResult<()> {
        self.ensure_live()?;
        if !self.settings.transitive_control {
            return self.registry.start(id).await;
        }
        let metadata = self.registry.metadata_set().await;
        for plugin_id in resolver::start_closure(&metadata, id)? {
            self.registry.start(&plugin_id).await?;
        }
        Ok(())
    }

    /// Stops a plugin; with transitive control, its dependents stop
    /// first, in reverse dependency order.
    pub async fn stop(&self, id: &str) -> PluginResult<()> {
        self.ensure_live()?;
        if !self.settings.transitive_control {
            return self.registry.stop(id).await;
        }
        let metadata = self.registry.metadata_set().await;
        for plugin_id in resolver::stop_closure(&metadata, id)? {
            self.registry.stop(&plugin_id).await?;
        }
        Ok(())
    }

    /// Restarts one plugin (stop, then start; never transitive).
    pub async fn restart(&self, id: &str) -> PluginResult<()> {
        self.ensure_live()?;
        self.registry.stop(id).await?;
        self.registry.start(id).await
    }

    /// Replaces a plugin's configuration mapping.
    pub async fn set_configuration(&self, id: &str, config: ConfigMap) -> PluginResult<()> {
        self.ensure_live()?;
        self.registry.set_configuration(id, config).await
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Descriptor snapshot of one plugin.
    pub async fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        self.registry.descriptor(id).await
    }

    /// Descriptor snapshots of all plugins.
    pub async fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.registry.descriptors().await
    }

    /// Descriptor snapshots of plugins in one state.
    pub async fn descriptors_in_state(&self, state: PluginState) -> Vec<PluginDescriptor> {
        self.registry.descriptors_in_state(state).await
    }

    /// Latest cached health record for a plugin.
    pub fn health_of(&self, id: &str) -> Option<HealthRecord> {
        self.monitor.health_of(id)
    }

    /// Re-arms auto-recovery for a plugin whose budget was spent.
    pub fn reset_recovery(&self, id: &str) {
        self.monitor.reset_attempts(id);
    }

    /// The event bus (for subscriptions and custom publishes).
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The extension registry.
    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    /// Activity counters.
    pub async fn stats(&self) -> ManagerStats {
        let descriptors = self.registry.descriptors().await;
        let mut stats = ManagerStats {
            total: descriptors.len(),
            bus: self.bus.stats(),
            ..Default::default()
        };
        for descriptor in descriptors {
            match descriptor.state {
                PluginState::Started => stats.started += 1,
                PluginState::Stopped => stats.stopped += 1,
                PluginState::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Drains the monitor, stops all started plugins in reverse
    /// dependency order, and shuts the bus down. Further operations
    /// return [`PluginError::Shutdown`].
    pub async fn shutdown(&self) -> PluginResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Plugin manager shutting down");
        self.monitor.stop().await;

        let metadata = self.registry.metadata_set().await;
        let order = match resolver::resolve(&metadata) {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "Dependency order unavailable at shutdown, stopping in registry order");
                self.registry.ids().await
            }
        };
        for id in order.iter().rev() {
            if let Err(e) = self.registry.stop(id).await {
                error!(plugin = %id, error = %e, "Failed to stop plugin during shutdown");
            }
        }

        self.bus.shutdown().await?;
        info!("Plugin manager shut down");
        Ok(())
    }

    fn ensure_live(&self) -> PluginResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PluginError::Shutdown);
        }
        Ok(())
    }
}

#[async_trait]
impl RecoveryHandler for PluginManager {
    async fn restart(&self, plugin_id: &str) -> PluginResult<()> {
        self.restart(plugin_id).await
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("settings", &self.settings)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

//! Lifecycle registry.
//!
//! Owns the live plugin objects and their descriptor snapshots, drives
//! the state machine, and emits one Lifecycle event per successful
//! transition — after the state update is visible to queries.
//!
//! Concurrency model: the entry map sits behind an async `RwLock`; each
//! entry carries a transition mutex serializing `start`/`stop`/
//! `configure` per plugin id, and a `parking_lot` lock around the
//! descriptor that is never held across an await. Hooks run outside the
//! descriptor lock, under a configurable timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crucible_bus::EventBus;
use crucible_core::{
    BoxedEvent, BoxedPlugin, ConfigMap, ConfigurationEvent, HookResult, LifecycleEvent,
    PluginDescriptor, PluginError, PluginMetadata, PluginResult, PluginState,
};

use crate::extensions::ExtensionRegistry;

/// Default per-hook timeout.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

struct PluginEntry {
    plugin: BoxedPlugin,
    descriptor: SyncRwLock<PluginDescriptor>,
    /// Serializes transitions for this plugin id.
    transition: Mutex<()>,
}

/// Registry of live plugins and their lifecycle state.
pub struct LifecycleRegistry {
    entries: RwLock<HashMap<String, Arc<PluginEntry>>>,
    bus: Arc<EventBus>,
    extensions: Arc<ExtensionRegistry>,
    hook_timeout: Duration,
}

impl LifecycleRegistry {
    /// Creates a registry publishing on `bus` and cleaning up extension
    /// entries through `extensions`.
    pub fn new(bus: Arc<EventBus>, extensions: Arc<ExtensionRegistry>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bus,
            extensions,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// Overrides the per-hook timeout.
    pub fn hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    // ─── Registration ────────────────────────────────────────────────────

    /// Registers a plugin and runs its `initialize` hook.
    ///
    /// The descriptor is inserted in `INSTALLED`; on hook success the
    /// plugin becomes `INITIALIZED`, on failure `FAILED` (remaining
    /// addressable for restart or uninstall). A duplicate id fails
    /// without invoking any hook.
    pub async fn register(
        &self,
        plugin: BoxedPlugin,
        location: Option<String>,
    ) -> PluginResult<PluginDescriptor> {
        let metadata = plugin.metadata().clone();
        let id = metadata.id.clone();

        let entry = {
            let mut entries = self.entries.write().await;
            if entries.contains_key(&id) {
                return Err(PluginError::duplicate(&id));
            }
            let mut descriptor = PluginDescriptor::new(metadata);
            descriptor.location = location;
            let entry = Arc::new(PluginEntry {
                plugin,
                descriptor: SyncRwLock::new(descriptor),
                transition: Mutex::new(()),
            });
            entries.insert(id.clone(), Arc::clone(&entry));
            entry
        };
        info!(plugin = %id, "Plugin registered");

        let _guard = entry.transition.lock().await;
        match self
            .run_hook(&id, "initialize", entry.plugin.initialize())
            .await
        {
            Ok(()) => {
                self.apply_transition(&entry, PluginState::Initialized).await;
                Ok(entry.descriptor.read().clone())
            }
            Err(e) => {
                error!(plugin = %id, error = %e, "initialize hook failed");
                self.apply_transition(&entry, PluginState::Failed).await;
                Err(e)
            }
        }
    }

    /// Removes a plugin: runs its `uninstall` hook (best-effort), drops
    /// the entry, marks the returned descriptor `UNINSTALLED`, emits the
    /// event, and withdraws extensions the plugin owns.
    pub async fn unregister(&self, id: &str) -> PluginResult<PluginDescriptor> {
        let entry = self.entry(id).await?;
        let _guard = entry.transition.lock().await;

        if let Err(e) = self
            .run_hook(id, "uninstall", entry.plugin.uninstall())
            .await
        {
            warn!(plugin = %id, error = %e, "uninstall hook failed, removing anyway");
        }

        self.entries.write().await.remove(id);
        self.apply_transition(&entry, PluginState::Uninstalled).await;
        self.extensions.drop_owned(id);
        info!(plugin = %id, "Plugin unregistered");
        Ok(entry.descriptor.read().clone())
    }

    // ─── Transitions ─────────────────────────────────────────────────────

    /// Starts a plugin. A plugin already in `STARTED` is a no-op
    /// success; `INSTALLED` plugins cannot be started (initialization
    /// happens at registration).
    pub async fn start(&self, id: &str) -> PluginResult<()> {
        let entry = self.entry(id).await?;
        let _guard = entry.transition.lock().await;

        let state = entry.descriptor.read().state;
        match state {
            PluginState::Started => return Ok(()),
            PluginState::Initialized | PluginState::Stopped | PluginState::Failed => {}
            other => {
                return Err(PluginError::StateViolation {
                    id: id.to_string(),
                    operation: "start".to_string(),
                    state: other.to_string(),
                });
            }
        }

        match self.run_hook(id, "start", entry.plugin.start()).await {
            Ok(()) => {
                self.apply_transition(&entry, PluginState::Started).await;
                self.register_provided_extensions(id, &entry);
                Ok(())
            }
            Err(e) => {
                error!(plugin = %id, error = %e, "start hook failed");
                self.apply_transition(&entry, PluginState::Failed).await;
                Err(e)
            }
        }
    }

    /// Stops a plugin. A plugin not in `STARTED` is a no-op success.
    pub async fn stop(&self, id: &str) -> PluginResult<()> {
        let entry = self.entry(id).await?;
        let _guard = entry.transition.lock().await;

        if entry.descriptor.read().state != PluginState::Started {
            return Ok(());
        }

        match self.run_hook(id, "stop", entry.plugin.stop()).await {
            Ok(()) => {
                self.apply_transition(&entry, PluginState::Stopped).await;
                Ok(())
            }
            Err(e) => {
                error!(plugin = %id, error = %e, "stop hook failed");
                self.apply_transition(&entry, PluginState::Failed).await;
                Err(e)
            }
        }
    }

    /// Replaces a plugin's configuration mapping and emits a
    /// Configuration event carrying both the previous and new mapping.
    pub async fn set_configuration(&self, id: &str, config: ConfigMap) -> PluginResult<()> {
        let entry = self.entry(id).await?;
        let _guard = entry.transition.lock().await;

        let previous = {
            let mut descriptor = entry.descriptor.write();
            std::mem::replace(&mut descriptor.configuration, config.clone())
        };

        self.publish(BoxedEvent::new(ConfigurationEvent::new(id, previous, config)))
            .await;
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// The live plugin object, if registered.
    pub async fn plugin(&self, id: &str) -> Option<BoxedPlugin> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.plugin))
    }

    /// Descriptor snapshot of one plugin.
    pub async fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|entry| entry.descriptor.read().clone())
    }

    /// Descriptor snapshots of all plugins.
    pub async fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.descriptor.read().clone())
            .collect()
    }

    /// Descriptor snapshots of plugins currently in `state`.
    pub async fn descriptors_in_state(&self, state: PluginState) -> Vec<PluginDescriptor> {
        self.descriptors()
            .await
            .into_iter()
            .filter(|d| d.state == state)
            .collect()
    }

    /// Metadata of all registered plugins (resolver input).
    pub async fn metadata_set(&self) -> Vec<PluginMetadata> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.descriptor.read().metadata.clone())
            .collect()
    }

    /// Registered plugin ids.
    pub async fn ids(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of registered plugins.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether a plugin id is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    // ─── Internals ───────────────────────────────────────────────────────

    async fn entry(&self, id: &str) -> PluginResult<Arc<PluginEntry>> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::not_found(id))
    }

    /// Runs one hook under the configured timeout.
    async fn run_hook(
        &self,
        id: &str,
        hook: &'static str,
        fut: impl Future<Output = HookResult>,
    ) -> PluginResult<()> {
        match tokio::time::timeout(self.hook_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PluginError::hook(id, hook, e)),
            Err(_) => Err(PluginError::Timeout {
                id: id.to_string(),
                hook,
                timeout_ms: self.hook_timeout.as_millis() as u64,
            }),
        }
    }

    /// Applies a state change and emits the Lifecycle event afterwards,
    /// so queries observe the new state before subscribers see the
    /// event.
    async fn apply_transition(&self, entry: &PluginEntry, new_state: PluginState) {
        let (id, previous) = {
            let mut descriptor = entry.descriptor.write();
            let previous = descriptor.state;
            if !previous.can_transition_to(new_state) {
                // Unreachable through the public surface; transitions are
                // validated before hooks run.
                warn!(
                    plugin = %descriptor.id(),
                    from = %previous,
                    to = %new_state,
                    "Refusing invalid state transition"
                );
                return;
            }
            descriptor.state = new_state;
            (descriptor.id().to_string(), previous)
        };
        if previous != new_state {
            self.publish(BoxedEvent::new(LifecycleEvent::new(id, previous, new_state)))
                .await;
        }
    }

    /// Registers the extensions a plugin provides, replacing any it
    /// already registered (re-starts stay idempotent).
    fn register_provided_extensions(&self, id: &str, entry: &PluginEntry) {
        let declared = entry.plugin.extensions();
        if declared.is_empty() {
            return;
        }
        self.extensions.drop_owned(id);
        for decl in declared {
            if let Err(e) = self.extensions.register_handle(
                &decl.extension_point,
                decl.handle,
                decl.priority,
                Some(id),
            ) {
                warn!(
                    plugin = %id,
                    point = %decl.extension_point,
                    error = %e,
                    "Skipping extension the registry rejected"
                );
            }
        }
    }

    async fn publish(&self, event: BoxedEvent) {
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "Failed to publish registry event");
        }
    }
}

impl std::fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleRegistry")
            .field("hook_timeout", &self.hook_timeout)
            .finish()
    }
}

//! Hot-deploy coordination.
//!
//! The coordinator consumes [`ArtifactEvent`]s from an external watcher
//! and drives the manager: `created` installs (and starts, when the
//! manager auto-starts), `modified` reinstalls, `deleted` uninstalls.
//! It keeps the artifact-key → plugin-id map so later events for the
//! same artifact find the plugin they refer to. It never touches the
//! filesystem itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crucible_core::{ArtifactEvent, ArtifactHandle, PluginLoader};

use crate::manager::PluginManager;

/// Per-event-kind enable flags for hot deployment.
#[derive(Debug, Clone)]
pub struct HotDeploySettings {
    /// Master switch; when off the coordinator exits immediately.
    pub enabled: bool,
    /// Whether `modified` artifacts are reinstalled.
    pub auto_reload: bool,
    /// Handle `created` events.
    pub watch_new: bool,
    /// Handle `modified` events.
    pub watch_updates: bool,
    /// Handle `deleted` events.
    pub watch_deletions: bool,
}

impl Default for HotDeploySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_reload: true,
            watch_new: true,
            watch_updates: true,
            watch_deletions: true,
        }
    }
}

/// Bridges watcher events to manager operations.
pub struct HotDeployCoordinator {
    manager: Arc<PluginManager>,
    loader: Arc<dyn PluginLoader>,
    settings: HotDeploySettings,
    /// artifact key → installed plugin id.
    installed: Mutex<HashMap<String, String>>,
}

impl HotDeployCoordinator {
    /// Creates a coordinator deploying through `loader`.
    pub fn new(
        manager: Arc<PluginManager>,
        loader: Arc<dyn PluginLoader>,
        settings: HotDeploySettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            loader,
            settings,
            installed: Mutex::new(HashMap::new()),
        })
    }

    /// Consumes watcher events until the channel closes or the token
    /// fires. Individual deployment failures are logged; the loop keeps
    /// going.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ArtifactEvent>,
        cancel: CancellationToken,
    ) {
        if !self.settings.enabled {
            debug!("Hot deployment disabled");
            return;
        }
        info!(loader = self.loader.name(), "Hot-deploy coordinator running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        info!("Hot-deploy coordinator stopped");
    }

    /// Applies one watcher event.
    pub async fn handle(&self, event: ArtifactEvent) {
        match event {
            ArtifactEvent::Created(handle) => {
                if self.settings.watch_new {
                    self.deploy(&handle).await;
                }
            }
            ArtifactEvent::Modified(handle) => {
                if !self.settings.watch_updates {
                    return;
                }
                if !self.settings.auto_reload {
                    debug!(artifact = %handle.key, "Artifact changed, auto-reload disabled");
                    return;
                }
                self.withdraw(&handle).await;
                self.deploy(&handle).await;
            }
            ArtifactEvent::Deleted(handle) => {
                if self.settings.watch_deletions {
                    self.withdraw(&handle).await;
                }
            }
        }
    }

    /// The plugin id currently installed for an artifact key, if any.
    pub fn plugin_for(&self, artifact_key: &str) -> Option<String> {
        self.installed.lock().get(artifact_key).cloned()
    }

    async fn deploy(&self, handle: &ArtifactHandle) {
        match self.manager.install_from(self.loader.as_ref(), handle).await {
            Ok(descriptor) => {
                info!(
                    artifact = %handle.key,
                    plugin = %descriptor.id(),
                    version = %descriptor.version(),
                    "Artifact deployed"
                );
                self.installed
                    .lock()
                    .insert(handle.key.clone(), descriptor.id().to_string());
            }
            Err(e) => {
                error!(artifact = %handle.key, error = %e, "Failed to deploy artifact");
            }
        }
    }

    async fn withdraw(&self, handle: &ArtifactHandle) {
        let plugin_id = self.installed.lock().remove(&handle.key);
        let Some(plugin_id) = plugin_id else {
            warn!(artifact = %handle.key, "No installed plugin for artifact, nothing to remove");
            return;
        };
        match self.manager.uninstall(&plugin_id).await {
            Ok(_) => info!(artifact = %handle.key, plugin = %plugin_id, "Artifact withdrawn"),
            Err(e) => {
                error!(
                    artifact = %handle.key,
                    plugin = %plugin_id,
                    error = %e,
                    "Failed to uninstall plugin for removed artifact"
                );
            }
        }
    }
}

impl std::fmt::Debug for HotDeployCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotDeployCoordinator")
            .field("settings", &self.settings)
            .field("installed", &self.installed.lock().len())
            .finish()
    }
}

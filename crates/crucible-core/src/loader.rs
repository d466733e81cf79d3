//! Loader and watcher contracts.
//!
//! The runtime never opens archives or touches the filesystem: an
//! external [`PluginLoader`] turns an opaque [`ArtifactHandle`] into a
//! live plugin object, and an external watcher feeds
//! [`ArtifactEvent`]s to the hot-deploy coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PluginResult;
use crate::plugin::BoxedPlugin;

/// Opaque reference to a deployable artifact.
///
/// `key` identifies the artifact across watcher events (the coordinator
/// maps keys to installed plugin ids); `location` is a display hint
/// carried into the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Stable identity of the artifact, e.g. a path or registry key.
    pub key: String,
    /// Human-readable location hint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ArtifactHandle {
    /// Creates a handle from its stable key.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            location: Some(key.clone()),
            key,
        }
    }
}

/// A watcher observation about one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactEvent {
    /// A new artifact appeared.
    Created(ArtifactHandle),
    /// An existing artifact changed.
    Modified(ArtifactHandle),
    /// An artifact disappeared.
    Deleted(ArtifactHandle),
}

impl ArtifactEvent {
    /// The handle this event concerns.
    pub fn handle(&self) -> &ArtifactHandle {
        match self {
            Self::Created(h) | Self::Modified(h) | Self::Deleted(h) => h,
        }
    }
}

/// Advisory resource hints surfaced to loaders.
///
/// The runtime publishes these with each load request and does not
/// enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceBudget {
    /// Suggested memory ceiling, in mebibytes.
    pub max_memory_mb: Option<u64>,
    /// Suggested CPU ceiling, in percent of one core.
    pub max_cpu_percent: Option<u32>,
    /// Suggested thread-count ceiling.
    pub max_threads: Option<u32>,
    /// Suggested open-file-handle ceiling.
    pub max_file_handles: Option<u32>,
    /// Suggested network-connection ceiling.
    pub max_network_connections: Option<u32>,
}

/// Context passed to loaders with each load request.
#[derive(Debug, Clone, Default)]
pub struct LoaderContext {
    /// Advisory resource hints for the loaded plugin.
    pub budget: ResourceBudget,
}

impl LoaderContext {
    /// Creates a context carrying the given budget.
    pub fn new(budget: ResourceBudget) -> Self {
        Self { budget }
    }
}

/// Produces live plugin objects from artifacts.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Loader name, for logging.
    fn name(&self) -> &str;

    /// Materializes the artifact into a fully-constructed plugin.
    async fn load(&self, handle: &ArtifactHandle, ctx: &LoaderContext)
    -> PluginResult<BoxedPlugin>;
}

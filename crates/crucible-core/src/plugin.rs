//! Plugin capability traits.
//!
//! A plugin is a capability set rather than a class hierarchy: the
//! required surface is [`Plugin`] (metadata plus the four lifecycle
//! hooks); [`HealthIndicator`] and extension provisioning are optional
//! capabilities discovered through the accessor methods.
//!
//! Hooks are async and may block internally; the lifecycle registry
//! never invokes them while holding a state lock, and applies the
//! resulting transition afterwards.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HookResult;
use crate::health::HealthRecord;
use crate::metadata::PluginMetadata;

/// Type-erased extension implementation handle.
///
/// The concrete type inside the `Arc` must equal the contract type of the
/// extension point it is registered against (commonly an
/// `Arc<dyn SomeContract>`).
pub type ExtensionHandle = Arc<dyn Any + Send + Sync>;

/// One extension a plugin offers: point id, implementation, priority.
#[derive(Clone)]
pub struct ExtensionDecl {
    /// The extension point to register against.
    pub extension_point: String,
    /// The implementation handle.
    pub handle: ExtensionHandle,
    /// Ordering priority; higher is preferred.
    pub priority: i32,
}

impl ExtensionDecl {
    /// Wraps a concrete implementation value.
    pub fn new<C: Any + Send + Sync>(
        extension_point: impl Into<String>,
        implementation: C,
        priority: i32,
    ) -> Self {
        Self {
            extension_point: extension_point.into(),
            handle: Arc::new(implementation),
            priority,
        }
    }
}

impl std::fmt::Debug for ExtensionDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionDecl")
            .field("extension_point", &self.extension_point)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Optional health-probe capability.
#[async_trait]
pub trait HealthIndicator: Send + Sync {
    /// Probes the plugin's health.
    ///
    /// An `Err` is recorded as `DOWN` with the error message; it does not
    /// abort the monitor tick.
    async fn health(&self) -> Result<HealthRecord, crate::error::HookError>;
}

/// The plugin contract consumed by the lifecycle registry.
///
/// Loaders yield fully-constructed implementations of this trait; the
/// runtime never materializes plugins itself.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// The plugin's immutable metadata.
    fn metadata(&self) -> &PluginMetadata;

    /// Called once at registration, before the plugin becomes
    /// `INITIALIZED`.
    async fn initialize(&self) -> HookResult;

    /// Called on every transition into `STARTED`.
    async fn start(&self) -> HookResult;

    /// Called on the `STARTED → STOPPED` transition.
    async fn stop(&self) -> HookResult;

    /// Called during unregistration, best-effort.
    async fn uninstall(&self) -> HookResult {
        Ok(())
    }

    /// The health-probe capability, if this plugin has one.
    fn health_indicator(&self) -> Option<&dyn HealthIndicator> {
        None
    }

    /// Extensions to register when the plugin starts.
    ///
    /// Entries are withdrawn automatically when the plugin is
    /// unregistered.
    fn extensions(&self) -> Vec<ExtensionDecl> {
        Vec::new()
    }
}

/// Shared handle to a live plugin object.
pub type BoxedPlugin = Arc<dyn Plugin>;

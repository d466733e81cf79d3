//! Core types and contracts for the Crucible plugin runtime.
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//!
//! - [`PluginMetadata`] / [`DependencySpec`] — immutable identity and
//!   dependency declarations, with `[?]<id><op><version>` parsing
//! - [`PluginState`] — the lifecycle state machine
//! - [`PluginDescriptor`] — value snapshots observed from outside
//! - [`Plugin`] and the optional capabilities ([`HealthIndicator`],
//!   extension provisioning via [`ExtensionDecl`])
//! - [`PluginEvent`] / [`BoxedEvent`] / [`EventCodec`] — the typed event
//!   model and its tag-discriminated wire form
//! - [`PluginLoader`] and the watcher contract ([`ArtifactEvent`])
//! - [`PluginError`] — the error taxonomy surfaced at the boundary
//!
//! Behavior lives in `crucible-bus` (event delivery), `crucible-host`
//! (registries, resolver, monitor, facade) and `crucible-runtime`
//! (configuration and orchestration).

pub mod descriptor;
pub mod error;
pub mod event;
pub mod health;
pub mod loader;
pub mod metadata;
pub mod plugin;
pub mod state;
pub mod version;

pub use descriptor::{ConfigMap, PluginDescriptor};
pub use error::{HookError, HookResult, PluginError, PluginResult};
pub use event::{
    BoxedEvent, CONFIGURATION_TAG, ConfigurationEvent, EventCodec, EventEnvelope, HEALTH_TAG,
    HealthEvent, LIFECYCLE_TAG, LifecycleEvent, PluginEvent, now_millis,
};
pub use health::{HealthRecord, HealthStatus, RECOVERY_ATTEMPTS_KEY};
pub use loader::{ArtifactEvent, ArtifactHandle, LoaderContext, PluginLoader, ResourceBudget};
pub use metadata::{DependencySpec, PluginMetadata, PluginMetadataBuilder};
pub use plugin::{BoxedPlugin, ExtensionDecl, ExtensionHandle, HealthIndicator, Plugin};
pub use state::PluginState;
pub use version::{ConstraintOp, VersionConstraint, compare_versions};

//! # Crucible
//!
//! A plugin runtime for long-running host processes. Crucible hosts,
//! orders, and coordinates independently-developed extensions: it owns
//! the per-plugin lifecycle state machine, resolves declared
//! dependencies with version constraints, routes extension-point calls
//! to priority-ordered implementations, delivers typed events over an
//! in-process or broker-backed bus, and probes plugin health with
//! bounded auto-recovery.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌────────────────────┐
//! │ CrucibleRuntime  │─────▶│   PluginManager    │  facade
//! │ (config, signals)│      └─────────┬──────────┘
//! └──────────────────┘                │
//!            ┌────────────┬───────────┼──────────────┬────────────┐
//!            ▼            ▼           ▼              ▼            ▼
//!       EventBus   ExtensionReg  LifecycleReg   HealthMonitor  resolver
//! ```
//!
//! - **Loaders** (external) materialize plugin objects; the runtime
//!   never touches artifacts itself.
//! - The **lifecycle registry** drives `INSTALLED → INITIALIZED →
//!   STARTED → STOPPED` transitions and emits one Lifecycle event per
//!   transition.
//! - The **resolver** orders start/stop across dependencies.
//! - The **extension registry** exposes plugin-supplied implementations
//!   behind typed extension points.
//! - The **health monitor** probes plugins each tick and restarts
//!   failing ones within a bounded attempt budget.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use crucible::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = CrucibleRuntime::new()?;
//!     runtime.manager().install(my_plugin()).await?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

// Core types
pub use crucible_core::*;

// Components
pub use crucible_bus;
pub use crucible_host;
pub use crucible_runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use crucible::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use crucible_runtime::CrucibleRuntime;

    // Facade and host components
    pub use crucible_host::{
        ExtensionRegistry, HealthMonitor, HealthSettings, HotDeployCoordinator,
        HotDeploySettings, ManagerSettings, PluginManager,
    };

    // Event bus
    pub use crucible_bus::{EventBus, Subscription, SubscriptionFilter};

    // Core traits and value types
    pub use crucible_core::{
        BoxedEvent, BoxedPlugin, ConfigMap, ExtensionDecl, HealthIndicator, HealthRecord,
        HealthStatus, HookResult, LifecycleEvent, Plugin, PluginDescriptor, PluginError,
        PluginLoader, PluginMetadata, PluginResult, PluginState,
    };
}

//! Host-side components of the Crucible plugin runtime.
//!
//! - [`ExtensionRegistry`] — extension points and priority-ordered
//!   implementations
//! - [`resolver`] — dependency ordering with version-constraint checks
//! - [`LifecycleRegistry`] — plugin records and the state machine
//! - [`HealthMonitor`] — periodic probing and bounded auto-recovery
//! - [`PluginManager`] — the facade composing all of the above
//! - [`HotDeployCoordinator`] — watcher-event driven install/reinstall/
//!   uninstall

pub mod deploy;
pub mod extensions;
pub mod health;
pub mod manager;
pub mod registry;
pub mod resolver;

pub use deploy::{HotDeployCoordinator, HotDeploySettings};
pub use extensions::{ExtensionPointInfo, ExtensionRegistry};
pub use health::{HealthMonitor, HealthSettings, RecoveryHandler};
pub use manager::{ManagerSettings, ManagerStats, PluginManager};
pub use registry::{DEFAULT_HOOK_TIMEOUT, LifecycleRegistry};
pub use resolver::{resolve, start_closure, stop_closure};

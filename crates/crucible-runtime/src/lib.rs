//! Runtime orchestration layer for the Crucible plugin runtime.
//!
//! Provides the ambient pieces around the host components: YAML
//! configuration with environment-variable expansion and validation,
//! `tracing`-based logging setup, and [`CrucibleRuntime`], which wires a
//! [`PluginManager`](crucible_host::PluginManager) from configuration
//! and runs it until shutdown.

pub mod config;
pub mod logging;
pub mod runtime;

pub use config::{
    ConfigError, ConfigLoader, ConfigResult, CrucibleConfig, EventBusType, load_config,
    load_config_from_file, validate_config,
};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::CrucibleRuntime;

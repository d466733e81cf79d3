//! Configuration module for the Crucible runtime.
//!
//! YAML-based configuration loading and validation for the event bus,
//! health monitor, lifecycle behavior, hot deployment, and resource
//! hints.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config, load_config_from_file};
pub use schema::{
    BrokerSettings, CrucibleConfig, EventBusConfig, EventBusType, HealthConfig,
    HotDeploymentConfig, LifecycleConfig, LogLevel, LoggingConfig, ResourceLimits,
};
pub use validation::validate_config;

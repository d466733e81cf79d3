//! Configuration schema.
//!
//! The configuration file is YAML; every section has full defaults so an
//! empty file (or none at all) yields a working in-memory runtime.
//!
//! ```yaml
//! logging:
//!   level: debug
//!
//! event_bus:
//!   type: broker
//!   broker:
//!     bootstrap: ws://broker:9092
//!     consumer_group: crucible
//!     default_topic: crucible-events
//!
//! health:
//!   monitoring_interval_ms: 10000
//!   max_recovery_attempts: 5
//!
//! hot_deployment:
//!   enabled: true
//!   polling_interval_ms: 2000
//!
//! auto_start_plugins: true
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crucible_core::ResourceBudget;
use crucible_host::{HealthSettings, HotDeploySettings, ManagerSettings};

// =============================================================================
// Root configuration
// =============================================================================

/// Root configuration of the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CrucibleConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Event-bus transport selection.
    pub event_bus: EventBusConfig,

    /// Health monitor configuration.
    pub health: HealthConfig,

    /// Lifecycle-hook behavior.
    pub lifecycle: LifecycleConfig,

    /// Hot-deployment flags for the artifact watcher.
    pub hot_deployment: HotDeploymentConfig,

    /// Start plugins right after installation.
    pub auto_start_plugins: bool,

    /// Advisory resource hints surfaced to loaders; never enforced.
    pub resources: ResourceLimits,
}

impl CrucibleConfig {
    /// Maps the file-level configuration onto facade settings.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            auto_start: self.auto_start_plugins,
            transitive_control: true,
            hook_timeout: self.lifecycle.hook_timeout(),
            health: self.health.to_settings(),
            subscription_capacity: self.event_bus.subscription_capacity,
            resources: self.resources.to_budget(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level.
    pub level: LogLevel,

    /// Module-specific level overrides, e.g.
    /// `{ "crucible_bus": "debug" }`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            filters: HashMap::new(),
        }
    }
}

/// Log level enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Converts to `tracing::Level`.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// Converts to a filter directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event bus
// =============================================================================

/// Which transport the event bus uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EventBusType {
    /// Direct in-process fan-out.
    #[default]
    InMemory,
    /// External broker relay.
    Broker,
}

/// Event-bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Transport selection.
    #[serde(rename = "type")]
    pub kind: EventBusType,

    /// Per-subscription buffer capacity.
    pub subscription_capacity: usize,

    /// Broker connection settings (used when `type: broker`).
    pub broker: BrokerSettings,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            kind: EventBusType::InMemory,
            subscription_capacity: 256,
            broker: BrokerSettings::default(),
        }
    }
}

/// Broker endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Relay endpoint, e.g. `ws://broker:9092`.
    pub bootstrap: String,

    /// Consumer group announced on connect.
    pub consumer_group: String,

    /// Topic used when publishing without an explicit one.
    pub default_topic: String,

    /// Per-event-tag topic overrides.
    pub topic_overrides: HashMap<String, String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            bootstrap: String::new(),
            consumer_group: "crucible".to_string(),
            default_topic: "crucible-events".to_string(),
            topic_overrides: HashMap::new(),
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Whether the monitor runs.
    pub enabled: bool,

    /// Probe period in milliseconds.
    pub monitoring_interval_ms: u64,

    /// Whether `DOWN` plugins are restarted automatically.
    pub auto_recovery_enabled: bool,

    /// Consecutive failed restarts tolerated per plugin.
    pub max_recovery_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitoring_interval_ms: 30_000,
            auto_recovery_enabled: true,
            max_recovery_attempts: 3,
        }
    }
}

impl HealthConfig {
    /// Maps onto monitor settings.
    pub fn to_settings(&self) -> HealthSettings {
        HealthSettings {
            enabled: self.enabled,
            interval: Duration::from_millis(self.monitoring_interval_ms),
            auto_recovery: self.auto_recovery_enabled,
            max_recovery_attempts: self.max_recovery_attempts,
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle-hook behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Per-hook timeout in milliseconds; on expiry the plugin is moved
    /// to `FAILED` and the call returns a timeout error.
    pub hook_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            hook_timeout_ms: 30_000,
        }
    }
}

impl LifecycleConfig {
    /// The hook timeout as a `Duration`.
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}

// =============================================================================
// Hot deployment
// =============================================================================

/// Hot-deployment flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotDeploymentConfig {
    /// Master switch.
    pub enabled: bool,

    /// Reinstall artifacts reported as modified.
    pub auto_reload: bool,

    /// React to new artifacts.
    pub watch_for_new: bool,

    /// React to modified artifacts.
    pub watch_for_updates: bool,

    /// React to deleted artifacts.
    pub watch_for_deletions: bool,

    /// Suggested poll period for polling watchers, in milliseconds.
    /// Consumed by the external watcher, not by the runtime.
    pub polling_interval_ms: u64,
}

impl Default for HotDeploymentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_reload: true,
            watch_for_new: true,
            watch_for_updates: true,
            watch_for_deletions: true,
            polling_interval_ms: 5_000,
        }
    }
}

impl HotDeploymentConfig {
    /// Maps onto coordinator settings.
    pub fn to_settings(&self) -> HotDeploySettings {
        HotDeploySettings {
            enabled: self.enabled,
            auto_reload: self.auto_reload,
            watch_new: self.watch_for_new,
            watch_updates: self.watch_for_updates,
            watch_deletions: self.watch_for_deletions,
        }
    }

    /// The suggested poll period as a `Duration`.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

// =============================================================================
// Resources
// =============================================================================

/// Advisory per-plugin resource hints.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceLimits {
    /// Suggested memory ceiling, in mebibytes.
    pub max_memory_mb: Option<u64>,
    /// Suggested CPU ceiling, percent of one core.
    pub max_cpu_percent: Option<u32>,
    /// Suggested thread-count ceiling.
    pub max_threads: Option<u32>,
    /// Suggested open-file-handle ceiling.
    pub max_file_handles: Option<u32>,
    /// Suggested network-connection ceiling.
    pub max_network_connections: Option<u32>,
}

impl ResourceLimits {
    /// Maps onto the loader-facing budget type.
    pub fn to_budget(&self) -> ResourceBudget {
        ResourceBudget {
            max_memory_mb: self.max_memory_mb,
            max_cpu_percent: self.max_cpu_percent,
            max_threads: self.max_threads,
            max_file_handles: self.max_file_handles,
            max_network_connections: self.max_network_connections,
        }
    }
}

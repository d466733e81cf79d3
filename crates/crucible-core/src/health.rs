//! Health status value types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::now_millis;

/// Key under which the monitor surfaces its recovery counter in
/// [`HealthRecord::details`].
pub const RECOVERY_ATTEMPTS_KEY: &str = "recovery_attempts";

/// Coarse health classification of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Operating normally.
    Up,
    /// Not operating.
    Down,
    /// Operating with reduced capability.
    Degraded,
    /// Health could not be determined.
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Degraded => "DEGRADED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One health observation of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// The observed plugin.
    pub plugin_id: String,
    /// The classification.
    pub status: HealthStatus,
    /// Human-readable detail message.
    pub message: String,
    /// Observation time, epoch milliseconds.
    pub timestamp: i64,
    /// Free-form details; the monitor adds `recovery_attempts` here.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl HealthRecord {
    /// Creates a record with the given status and message, stamped now.
    pub fn new(
        plugin_id: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            status,
            message: message.into(),
            timestamp: now_millis(),
            details: Map::new(),
        }
    }

    /// An `UP` record.
    pub fn up(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, HealthStatus::Up, message)
    }

    /// A `DOWN` record.
    pub fn down(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, HealthStatus::Down, message)
    }

    /// A `DEGRADED` record.
    pub fn degraded(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, HealthStatus::Degraded, message)
    }

    /// An `UNKNOWN` record.
    pub fn unknown(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, HealthStatus::Unknown, message)
    }

    /// Adds a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Reads the recovery counter out of the details, if present.
    pub fn recovery_attempts(&self) -> Option<u64> {
        self.details.get(RECOVERY_ATTEMPTS_KEY).and_then(Value::as_u64)
    }
}

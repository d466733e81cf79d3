//! Descriptor snapshots.
//!
//! A [`PluginDescriptor`] is the view of a plugin observed from outside
//! the lifecycle registry: metadata plus the state and configuration at
//! the moment of the query. Descriptors are independent values; holding
//! one never keeps the live plugin object alive, and mutating the
//! registry afterwards does not change descriptors already handed out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::PluginMetadata;
use crate::state::PluginState;

/// String-keyed configuration mapping attached to a plugin.
pub type ConfigMap = Map<String, Value>;

/// Value snapshot of a registered plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// The plugin's immutable metadata.
    pub metadata: PluginMetadata,
    /// Lifecycle state at snapshot time.
    pub state: PluginState,
    /// Configuration mapping at snapshot time.
    #[serde(default)]
    pub configuration: ConfigMap,
    /// Opaque location/loader information, if the loader supplied any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl PluginDescriptor {
    /// Creates a descriptor for a freshly registered plugin.
    pub fn new(metadata: PluginMetadata) -> Self {
        Self {
            metadata,
            state: PluginState::Installed,
            configuration: ConfigMap::new(),
            location: None,
        }
    }

    /// The plugin id (shorthand for `metadata.id`).
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// The plugin version (shorthand for `metadata.version`).
    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Sets the opaque location string.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

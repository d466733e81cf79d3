//! Event model for the Crucible runtime.
//!
//! Events are type-erased through [`BoxedEvent`] and discriminated on the
//! wire by a string tag. The built-in subtypes are [`LifecycleEvent`],
//! [`ConfigurationEvent`], and [`HealthEvent`]; hosts register further
//! subtypes on the [`EventCodec`] by tag.
//!
//! # Wire form
//!
//! The external transport carries a self-describing JSON envelope:
//!
//! ```json
//! { "type": "plugin.lifecycle",
//!   "plugin_id": "p1",
//!   "timestamp": 1721900000000,
//!   "payload": { ... } }
//! ```
//!
//! Decoding an envelope with an unregistered `type` yields `Ok(None)`;
//! consumers log a warning and drop the message instead of failing the
//! subscription.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::ConfigMap;
use crate::error::{PluginError, PluginResult};
use crate::health::HealthRecord;
use crate::state::PluginState;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Core event trait
// ============================================================================

/// The base shape every bus event satisfies.
///
/// Events are immutable after construction and shared by `Arc`; the
/// concrete type is recovered with [`BoxedEvent::downcast_ref`].
pub trait PluginEvent: Any + Send + Sync {
    /// The originating plugin, if the event concerns one.
    fn plugin_id(&self) -> Option<&str>;

    /// The wire discriminator for this event subtype.
    fn type_tag(&self) -> &str;

    /// Creation time, epoch milliseconds.
    fn timestamp_ms(&self) -> i64;

    /// Self as `Any`, for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Serializes the subtype-specific payload for the wire envelope.
    fn to_payload(&self) -> PluginResult<Value>;
}

/// A cloneable, type-erased event handle.
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn PluginEvent>,
}

impl BoxedEvent {
    /// Wraps a concrete event.
    pub fn new<E: PluginEvent>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Attempts to view the event as a concrete subtype.
    pub fn downcast_ref<E: PluginEvent>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }

    /// The inner shared event.
    pub fn inner(&self) -> &Arc<dyn PluginEvent> {
        &self.inner
    }
}

impl std::ops::Deref for BoxedEvent {
    type Target = dyn PluginEvent;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("type_tag", &self.type_tag())
            .field("plugin_id", &self.plugin_id())
            .field("timestamp", &self.timestamp_ms())
            .finish()
    }
}

// ============================================================================
// Built-in subtypes
// ============================================================================

/// Wire tag of [`LifecycleEvent`].
pub const LIFECYCLE_TAG: &str = "plugin.lifecycle";
/// Wire tag of [`ConfigurationEvent`].
pub const CONFIGURATION_TAG: &str = "plugin.configuration";
/// Wire tag of [`HealthEvent`].
pub const HEALTH_TAG: &str = "plugin.health";

/// Emitted on every successful state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// The transitioned plugin.
    pub plugin_id: String,
    /// State before the transition.
    pub previous_state: PluginState,
    /// State after the transition.
    pub new_state: PluginState,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
}

impl LifecycleEvent {
    /// Creates a transition event stamped now.
    pub fn new(
        plugin_id: impl Into<String>,
        previous_state: PluginState,
        new_state: PluginState,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            previous_state,
            new_state,
            timestamp: now_millis(),
        }
    }
}

impl PluginEvent for LifecycleEvent {
    fn plugin_id(&self) -> Option<&str> {
        Some(&self.plugin_id)
    }

    fn type_tag(&self) -> &str {
        LIFECYCLE_TAG
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_payload(&self) -> PluginResult<Value> {
        serde_json::to_value(self).map_err(|e| PluginError::Serialization(e.to_string()))
    }
}

/// Emitted when a plugin's configuration mapping is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationEvent {
    /// The reconfigured plugin.
    pub plugin_id: String,
    /// The configuration before the change.
    pub previous_config: ConfigMap,
    /// The configuration after the change.
    pub new_config: ConfigMap,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
}

impl ConfigurationEvent {
    /// Creates a configuration-change event stamped now.
    pub fn new(plugin_id: impl Into<String>, previous: ConfigMap, new: ConfigMap) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            previous_config: previous,
            new_config: new,
            timestamp: now_millis(),
        }
    }
}

impl PluginEvent for ConfigurationEvent {
    fn plugin_id(&self) -> Option<&str> {
        Some(&self.plugin_id)
    }

    fn type_tag(&self) -> &str {
        CONFIGURATION_TAG
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_payload(&self) -> PluginResult<Value> {
        serde_json::to_value(self).map_err(|e| PluginError::Serialization(e.to_string()))
    }
}

/// Emitted by the health monitor after each probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    /// The observed record.
    pub record: HealthRecord,
}

impl HealthEvent {
    /// Wraps a health record.
    pub fn new(record: HealthRecord) -> Self {
        Self { record }
    }
}

impl PluginEvent for HealthEvent {
    fn plugin_id(&self) -> Option<&str> {
        Some(&self.record.plugin_id)
    }

    fn type_tag(&self) -> &str {
        HEALTH_TAG
    }

    fn timestamp_ms(&self) -> i64 {
        self.record.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_payload(&self) -> PluginResult<Value> {
        serde_json::to_value(self).map_err(|e| PluginError::Serialization(e.to_string()))
    }
}

// ============================================================================
// Wire envelope and codec
// ============================================================================

/// The self-describing wire form of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Subtype discriminator.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Originating plugin, if any (doubles as the broker message key).
    pub plugin_id: Option<String>,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Subtype-specific payload.
    pub payload: Value,
}

/// Decoder for one event subtype: payload → concrete event.
pub type DecodeFn = Arc<dyn Fn(&EventEnvelope) -> PluginResult<BoxedEvent> + Send + Sync>;

/// Tag-indexed decoder table for the external transport.
///
/// Pre-populated with the built-in subtypes; hosts add their own with
/// [`register`](Self::register). Decoders for the same tag replace each
/// other (last registration wins).
pub struct EventCodec {
    decoders: RwLock<HashMap<String, DecodeFn>>,
}

impl EventCodec {
    /// Creates a codec with the built-in subtypes registered.
    pub fn with_builtins() -> Self {
        let codec = Self {
            decoders: RwLock::new(HashMap::new()),
        };
        codec.register_typed::<LifecycleEvent>(LIFECYCLE_TAG);
        codec.register_typed::<ConfigurationEvent>(CONFIGURATION_TAG);
        codec.register_typed::<HealthEvent>(HEALTH_TAG);
        codec
    }

    /// Registers a decoder closure for a tag.
    pub fn register(&self, tag: impl Into<String>, decode: DecodeFn) {
        self.decoders.write().insert(tag.into(), decode);
    }

    /// Registers a serde-deserializable event type under a tag.
    pub fn register_typed<E>(&self, tag: &str)
    where
        E: PluginEvent + serde::de::DeserializeOwned,
    {
        self.register(
            tag,
            Arc::new(|envelope: &EventEnvelope| {
                let event: E = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| PluginError::Serialization(e.to_string()))?;
                Ok(BoxedEvent::new(event))
            }),
        );
    }

    /// Whether a decoder is registered for the tag.
    pub fn knows(&self, tag: &str) -> bool {
        self.decoders.read().contains_key(tag)
    }

    /// Builds the wire envelope for an event.
    pub fn to_envelope(&self, event: &BoxedEvent) -> PluginResult<EventEnvelope> {
        Ok(EventEnvelope {
            type_tag: event.type_tag().to_string(),
            plugin_id: event.plugin_id().map(str::to_string),
            timestamp: event.timestamp_ms(),
            payload: event.to_payload()?,
        })
    }

    /// Encodes an event into envelope JSON text.
    pub fn encode(&self, event: &BoxedEvent) -> PluginResult<String> {
        let envelope = self.to_envelope(event)?;
        serde_json::to_string(&envelope).map_err(|e| PluginError::Serialization(e.to_string()))
    }

    /// Decodes a parsed envelope into an event.
    ///
    /// Returns `Ok(None)` when the tag is unknown; a payload that does
    /// not match the registered subtype is an error.
    pub fn decode_envelope(&self, envelope: &EventEnvelope) -> PluginResult<Option<BoxedEvent>> {
        let decoder = self.decoders.read().get(&envelope.type_tag).cloned();
        match decoder {
            Some(decode) => decode(envelope).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes envelope JSON text into an event.
    ///
    /// Returns `Ok(None)` when the tag is unknown; malformed JSON or a
    /// payload that does not match the registered subtype is an error.
    pub fn decode(&self, text: &str) -> PluginResult<Option<BoxedEvent>> {
        let envelope: EventEnvelope = serde_json::from_str(text)
            .map_err(|e| PluginError::Serialization(e.to_string()))?;
        self.decode_envelope(&envelope)
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for EventCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCodec")
            .field("tags", &self.decoders.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_round_trip_preserves_fields() {
        let codec = EventCodec::with_builtins();
        let event = BoxedEvent::new(LifecycleEvent::new(
            "p1",
            PluginState::Initialized,
            PluginState::Started,
        ));

        let wire = codec.encode(&event).unwrap();
        let decoded = codec.decode(&wire).unwrap().expect("known tag");
        let concrete: &LifecycleEvent = decoded.downcast_ref().unwrap();

        let original: &LifecycleEvent = event.downcast_ref().unwrap();
        assert_eq!(concrete, original);
        assert_eq!(concrete.timestamp, original.timestamp);
    }

    #[test]
    fn configuration_round_trip() {
        let codec = EventCodec::with_builtins();
        let mut prev = ConfigMap::new();
        prev.insert("threads".into(), json!(4));
        let mut next = ConfigMap::new();
        next.insert("threads".into(), json!(8));
        next.insert("verbose".into(), json!(true));

        let event = BoxedEvent::new(ConfigurationEvent::new("p2", prev, next));
        let wire = codec.encode(&event).unwrap();
        let decoded = codec.decode(&wire).unwrap().unwrap();
        assert_eq!(
            decoded.downcast_ref::<ConfigurationEvent>(),
            event.downcast_ref::<ConfigurationEvent>()
        );
    }

    #[test]
    fn reencode_is_stable() {
        let codec = EventCodec::with_builtins();
        let event = BoxedEvent::new(LifecycleEvent::new(
            "p1",
            PluginState::Started,
            PluginState::Stopped,
        ));
        let first = codec.encode(&event).unwrap();
        let second = codec.encode(&codec.decode(&first).unwrap().unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_tag_is_dropped_not_fatal() {
        let codec = EventCodec::with_builtins();
        let wire = json!({
            "type": "host.custom",
            "plugin_id": null,
            "timestamp": 1,
            "payload": {}
        })
        .to_string();
        assert!(codec.decode(&wire).unwrap().is_none());
    }

    #[test]
    fn host_defined_subtype() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct DeployEvent {
            plugin_id: String,
            artifact: String,
            timestamp: i64,
        }

        impl PluginEvent for DeployEvent {
            fn plugin_id(&self) -> Option<&str> {
                Some(&self.plugin_id)
            }
            fn type_tag(&self) -> &str {
                "host.deploy"
            }
            fn timestamp_ms(&self) -> i64 {
                self.timestamp
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn to_payload(&self) -> PluginResult<Value> {
                serde_json::to_value(self).map_err(|e| PluginError::Serialization(e.to_string()))
            }
        }

        let codec = EventCodec::with_builtins();
        codec.register_typed::<DeployEvent>("host.deploy");

        let event = BoxedEvent::new(DeployEvent {
            plugin_id: "p3".into(),
            artifact: "p3-1.0.0.tar".into(),
            timestamp: 42,
        });
        let wire = codec.encode(&event).unwrap();
        let decoded = codec.decode(&wire).unwrap().unwrap();
        assert_eq!(
            decoded.downcast_ref::<DeployEvent>(),
            event.downcast_ref::<DeployEvent>()
        );
    }
}

//! Transport abstraction for the event bus.
//!
//! A transport decides what happens between `publish` and local fan-out.
//! The in-process transport delivers directly; the broker transport
//! (feature `broker`) relays through an external endpoint and feeds
//! local subscribers from its consumer loop.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crucible_core::{BoxedEvent, PluginError, PluginResult};

use crate::subscription::SubscriberSet;

/// Delivery backend of an [`EventBus`](crate::EventBus).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name reported by `transport_type()`.
    fn name(&self) -> &'static str;

    /// Connects the transport and hands it the local subscriber set.
    async fn initialize(&self, local: Arc<SubscriberSet>) -> PluginResult<()>;

    /// Accepts one published event.
    async fn publish(&self, topic: Option<&str>, event: &BoxedEvent) -> PluginResult<()>;

    /// Flushes and disconnects.
    async fn shutdown(&self) -> PluginResult<()>;
}

/// Direct fan-out within the current process.
#[derive(Default)]
pub struct InProcessTransport {
    local: OnceLock<Arc<SubscriberSet>>,
}

impl InProcessTransport {
    /// Creates the transport.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn initialize(&self, local: Arc<SubscriberSet>) -> PluginResult<()> {
        let _ = self.local.set(local);
        Ok(())
    }

    async fn publish(&self, topic: Option<&str>, event: &BoxedEvent) -> PluginResult<()> {
        let local = self
            .local
            .get()
            .ok_or_else(|| PluginError::transport("in-memory transport not initialized"))?;
        local.fan_out(topic, event);
        Ok(())
    }

    async fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }
}

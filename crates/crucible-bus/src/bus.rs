//! The event bus.
//!
//! Publishers hand events to the bus and receive an acknowledgement that
//! the bus accepted them, never that subscribers processed them. Per
//! publishing task, each subscription observes events in publish order;
//! there is no global order across publishers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use tracing::{debug, info};

use crucible_core::{BoxedEvent, EventCodec, PluginError, PluginResult, now_millis};

use crate::subscription::{
    DEFAULT_SUBSCRIPTION_CAPACITY, SubscriberSet, Subscription, SubscriptionFilter,
};
use crate::transport::{InProcessTransport, Transport};

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

/// Acknowledgement that the bus accepted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// When the bus accepted the event, epoch milliseconds.
    pub accepted_at: i64,
}

/// Counters describing bus activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    /// Events accepted from publishers.
    pub published: u64,
    /// Deliveries into subscription buffers.
    pub delivered: u64,
    /// Events evicted from full subscription buffers.
    pub dropped: u64,
    /// Live subscriptions.
    pub subscriptions: usize,
}

impl std::fmt::Display for BusStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus: {} published, {} delivered, {} dropped, {} subscription(s)",
            self.published, self.delivered, self.dropped, self.subscriptions
        )
    }
}

/// Typed pub/sub hub with a pluggable transport.
pub struct EventBus {
    subscribers: Arc<SubscriberSet>,
    transport: Box<dyn Transport>,
    codec: Arc<EventCodec>,
    subscription_capacity: usize,
    state: AtomicU8,
    published: AtomicU64,
}

impl EventBus {
    /// Creates a bus with the in-process transport.
    pub fn in_process() -> Self {
        Self::with_transport(Box::new(InProcessTransport::new()), Arc::new(EventCodec::with_builtins()))
    }

    /// Creates a bus over an explicit transport and codec.
    pub fn with_transport(transport: Box<dyn Transport>, codec: Arc<EventCodec>) -> Self {
        Self {
            subscribers: Arc::new(SubscriberSet::new()),
            transport,
            codec,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            state: AtomicU8::new(STATE_CREATED),
            published: AtomicU64::new(0),
        }
    }

    /// Overrides the per-subscription buffer capacity.
    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }

    /// The codec used by the external transport; host-defined event
    /// subtypes register their tags here.
    pub fn codec(&self) -> &Arc<EventCodec> {
        &self.codec
    }

    /// Name of the underlying transport.
    pub fn transport_type(&self) -> &'static str {
        self.transport.name()
    }

    /// Connects the transport and opens the bus for publishing.
    pub async fn initialize(&self) -> PluginResult<()> {
        self.transport.initialize(Arc::clone(&self.subscribers)).await?;
        self.state.store(STATE_RUNNING, Ordering::Release);
        info!(transport = self.transport.name(), "Event bus initialized");
        Ok(())
    }

    /// Publishes an event to all matching subscribers.
    pub async fn publish(&self, event: BoxedEvent) -> PluginResult<PublishAck> {
        self.publish_inner(None, event).await
    }

    /// Publishes an event, additionally routing it to subscribers scoped
    /// to `topic`.
    pub async fn publish_to_topic(
        &self,
        topic: &str,
        event: BoxedEvent,
    ) -> PluginResult<PublishAck> {
        self.publish_inner(Some(topic), event).await
    }

    async fn publish_inner(
        &self,
        topic: Option<&str>,
        event: BoxedEvent,
    ) -> PluginResult<PublishAck> {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => {}
            STATE_SHUTDOWN => return Err(PluginError::Shutdown),
            _ => return Err(PluginError::transport("event bus not initialized")),
        }

        self.transport.publish(topic, &event).await?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(PublishAck {
            accepted_at: now_millis(),
        })
    }

    /// Opens a subscription with an explicit filter.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> PluginResult<Subscription> {
        if self.state.load(Ordering::Acquire) == STATE_SHUTDOWN {
            return Err(PluginError::Shutdown);
        }
        debug!(?filter, "Opening subscription");
        Ok(self.subscribers.subscribe(filter, self.subscription_capacity))
    }

    /// Subscribes to every event with the given wire tag.
    pub fn subscribe_tag(&self, tag: &str) -> PluginResult<Subscription> {
        self.subscribe(SubscriptionFilter::all().with_tag(tag))
    }

    /// Subscribes to events from one plugin, optionally narrowed by tag.
    pub fn subscribe_plugin(
        &self,
        plugin_id: &str,
        tag: Option<&str>,
    ) -> PluginResult<Subscription> {
        let mut filter = SubscriptionFilter::all().with_plugin(plugin_id);
        if let Some(tag) = tag {
            filter = filter.with_tag(tag);
        }
        self.subscribe(filter)
    }

    /// Subscribes to events published to one topic, optionally narrowed
    /// by tag.
    pub fn subscribe_topic(&self, topic: &str, tag: Option<&str>) -> PluginResult<Subscription> {
        let mut filter = SubscriptionFilter::all().with_topic(topic);
        if let Some(tag) = tag {
            filter = filter.with_tag(tag);
        }
        self.subscribe(filter)
    }

    /// Current activity counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.subscribers.delivered(),
            dropped: self.subscribers.dropped(),
            subscriptions: self.subscribers.len(),
        }
    }

    /// Closes all subscriptions, flushes the transport, and rejects
    /// further publishes.
    pub async fn shutdown(&self) -> PluginResult<()> {
        let previous = self.state.swap(STATE_SHUTDOWN, Ordering::AcqRel);
        if previous == STATE_SHUTDOWN {
            return Ok(());
        }
        self.transport.shutdown().await?;
        self.subscribers.close_all();
        info!(transport = self.transport.name(), "Event bus shut down");
        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("transport", &self.transport.name())
            .field("stats", &self.stats())
            .finish()
    }
}

//! Subscriptions and fan-out.
//!
//! Each subscription owns a bounded queue; when a publisher outruns the
//! consumer the oldest buffered event is dropped and counted, so a slow
//! subscriber can never block publishers. Fan-out happens on the
//! publisher's task under a short read lock; consumers are woken through
//! a [`Notify`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::trace;

use crucible_core::BoxedEvent;

/// Default per-subscription buffer capacity.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 256;

/// Predicate deciding which published events a subscription receives.
///
/// All present fields must match. A subscription with a `topic` filter
/// only sees events published to that topic; subscriptions without one
/// see every event, topic-published or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Match the event's wire tag.
    pub type_tag: Option<String>,
    /// Match the originating plugin id.
    pub plugin_id: Option<String>,
    /// Match the publish topic.
    pub topic: Option<String>,
}

impl SubscriptionFilter {
    /// A filter matching every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one event subtype.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = Some(tag.into());
        self
    }

    /// Restricts to one originating plugin.
    pub fn with_plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Restricts to one publish topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    fn matches(&self, topic: Option<&str>, event: &BoxedEvent) -> bool {
        if let Some(tag) = &self.type_tag
            && event.type_tag() != tag
        {
            return false;
        }
        if let Some(plugin) = &self.plugin_id
            && event.plugin_id() != Some(plugin.as_str())
        {
            return false;
        }
        if let Some(wanted) = &self.topic
            && topic != Some(wanted.as_str())
        {
            return false;
        }
        true
    }
}

struct Shared {
    id: u64,
    filter: SubscriptionFilter,
    capacity: usize,
    queue: Mutex<VecDeque<BoxedEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    /// Enqueues one event, evicting the oldest entry on overflow.
    /// Returns `true` when an event was evicted.
    fn push(&self, event: BoxedEvent) -> bool {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(event);
            evicted
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    fn pop(&self) -> Option<BoxedEvent> {
        self.queue.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Consumer half of a bus subscription.
///
/// Dropping the subscription detaches it from the bus; events already
/// buffered are discarded.
pub struct Subscription {
    shared: Arc<Shared>,
    set: Weak<SubscriberSet>,
}

impl Subscription {
    /// Receives the next matching event.
    ///
    /// Returns `None` once the subscription is closed and its buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<BoxedEvent> {
        loop {
            if let Some(event) = self.shared.pop() {
                return Some(event);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return self.shared.pop();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Receives without waiting.
    pub fn try_recv(&mut self) -> Option<BoxedEvent> {
        self.shared.pop()
    }

    /// Number of events dropped from this subscription's buffer.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of events currently buffered.
    pub fn buffered(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Detaches the subscription immediately.
    pub fn close(&self) {
        if let Some(set) = self.set.upgrade() {
            set.detach(self.shared.id);
        }
        self.shared.close();
    }

    /// Adapts the subscription into a [`futures::Stream`] of events.
    pub fn into_stream(self) -> impl futures::Stream<Item = BoxedEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.detach(self.shared.id);
        }
        self.shared.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("filter", &self.shared.filter)
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// The set of live subscriptions attached to a bus.
///
/// Shared between the bus front-end and transport consumer tasks, which
/// both deliver through [`fan_out`](Self::fan_out).
pub struct SubscriberSet {
    subscriptions: RwLock<Vec<Arc<Shared>>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriberSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attaches a new subscription with the given buffer capacity.
    pub fn subscribe(self: &Arc<Self>, filter: SubscriptionFilter, capacity: usize) -> Subscription {
        let shared = Arc::new(Shared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            filter,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.subscriptions.write().push(Arc::clone(&shared));
        Subscription {
            shared,
            set: Arc::downgrade(self),
        }
    }

    /// Delivers one event to every matching subscription.
    pub fn fan_out(&self, topic: Option<&str>, event: &BoxedEvent) {
        let subscriptions = self.subscriptions.read();
        for sub in subscriptions.iter() {
            if !sub.filter.matches(topic, event) {
                continue;
            }
            if sub.push(event.clone()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    subscription = sub.id,
                    tag = event.type_tag(),
                    "Subscription buffer full, dropped oldest event"
                );
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Closes every subscription (used at bus shutdown).
    pub fn close_all(&self) {
        let subscriptions: Vec<_> = std::mem::take(&mut *self.subscriptions.write());
        for sub in subscriptions {
            sub.close();
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether no subscriptions are attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events delivered into subscription buffers.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Total events dropped across all subscription buffers.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn detach(&self, id: u64) {
        self.subscriptions.write().retain(|sub| sub.id != id);
    }
}

impl Default for SubscriberSet {
    fn default() -> Self {
        Self::new()
    }
}

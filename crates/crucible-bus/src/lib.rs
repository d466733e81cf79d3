//! Typed event bus for the Crucible plugin runtime.
//!
//! The bus delivers [`BoxedEvent`](crucible_core::BoxedEvent)s to
//! in-process subscribers filtered by event tag, originating plugin, and
//! topic. Delivery is best-effort within the process: every subscription
//! buffers into a bounded queue and evicts its oldest event when full,
//! so a slow consumer never blocks publishers; evictions are counted and
//! observable through [`BusStats`].
//!
//! Two transports are provided:
//!
//! - [`InProcessTransport`] — direct fan-out (default)
//! - [`BrokerTransport`] (feature `broker`) — relays the JSON envelope
//!   to an external broker endpoint and feeds local subscribers from a
//!   consumer loop, with automatic reconnection

pub mod bus;
pub mod subscription;
pub mod transport;

#[cfg(feature = "broker")]
pub mod broker;

pub use bus::{BusStats, EventBus, PublishAck};
pub use subscription::{
    DEFAULT_SUBSCRIPTION_CAPACITY, SubscriberSet, Subscription, SubscriptionFilter,
};
pub use transport::{InProcessTransport, Transport};

#[cfg(feature = "broker")]
pub use broker::{BrokerConfig, BrokerTransport, ReconnectPolicy};

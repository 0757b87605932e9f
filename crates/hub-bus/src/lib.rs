//! # Hub Bus - In-Process Event Bus for Sensor Hub Components
//!
//! Producers (sensor drivers, processing chains, control inputs) publish
//! immutable events under a source id; consumers subscribe with topic
//! patterns and receive matching events asynchronously, pulling them with
//! explicit demand.
//!
//! ## Routing
//!
//! ```text
//!   Publisher("weather/outputs/temp") ──┐
//!                                       ├──► Subscription ──► delivery task ──► Subscriber
//!   Publisher("weather/outputs/wind") ──┘      (buffer + demand)
//!
//!   Group("station")
//!     member "station/a" ──┐
//!     member "station/b" ──┴──► dispatcher (one order for the group) ──► Subscriptions
//! ```
//!
//! - Topic patterns are exact source ids or prefixes ending in `*`.
//!   A group id used as a topic receives every member's events.
//! - Publishing never blocks on consumers. Each subscription buffers up to
//!   `BusConfig::subscription_buffer_capacity` undelivered events and
//!   drops beyond that.
//! - Per publisher, events reach each subscriber in publish order. Within
//!   a group, all members share one order.
//!
//! ## Example
//!
//! ```rust,ignore
//! let bus = EventBus::new(BusConfig::default())?;
//! bus.start()?;
//!
//! let subscription = bus
//!     .new_subscription_of::<DataEvent>()?
//!     .with_topic_id("urn:sensor:*")
//!     .consume(|event| println!("{:?}", event.records()))?
//!     .await?;
//!
//! let publisher = bus.get_publisher("urn:sensor:1/outputs/temp")?;
//! publisher.publish(DataEvent::new(EventHeader::new(publisher.source_id())?, "temp", records))?;
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod builder;
pub mod bus;
pub mod config;
mod delivery;
pub mod error;
pub mod event;
pub mod events;
mod group;
pub mod metrics;
pub mod publisher;
pub mod source;
pub mod stream;
pub mod subscription;
pub mod topic;

// Re-export main types
pub use builder::{SubscribeFuture, SubscriptionBuilder};
pub use bus::{BusState, EventBus};
pub use config::{BusConfig, DEFAULT_BUFFER_CAPACITY};
pub use error::{BusError, ConfigurationError, DeliveryError};
pub use event::{now_millis, AsAny, Event, EventCast, EventHeader, EventType, SourceRef};
pub use events::{CommandEvent, ComponentStatus, DataEvent, StatusEvent};
pub use metrics::{BusMetrics, MetricsRecorder, MetricsSnapshot, NoOpMetrics};
pub use publisher::Publisher;
pub use source::EventSourceInfo;
pub use stream::EventStream;
pub use subscription::{
    CallbackSubscriber, DropAction, DropHandler, Subscriber, Subscription, SubscriptionId,
    SubscriptionState, UNBOUNDED_DEMAND,
};
pub use topic::{TopicPattern, TopicSet, TOPIC_WILDCARD};

//! Fluent subscription construction.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::bus::BusShared;
use crate::error::{BusError, ConfigurationError, DeliveryError};
use crate::event::{Event, EventCast, EventType};
use crate::stream::{ChannelSubscriber, EventStream};
use crate::subscription::{
    CallbackSubscriber, EventPredicate, Subscriber, Subscription, SubscriptionSpec,
};
use crate::source::EventSourceInfo;
use crate::topic::{TopicPattern, TopicSet};

/// Builds a subscription delivering events as `E`.
///
/// `E = dyn Event` receives every event type; a concrete `E` only receives
/// events of that type. Nothing is registered until one of the subscribe
/// methods is called.
#[must_use = "a subscription builder does nothing until subscribed"]
pub struct SubscriptionBuilder<E: ?Sized + EventCast = dyn Event> {
    bus: Arc<BusShared>,
    topics: TopicSet,
    event_types: Vec<EventType>,
    filter: Option<EventPredicate>,
    incompatible: Option<EventType>,
    _consumer: PhantomData<fn(Arc<E>)>,
}

impl<E: ?Sized + EventCast> SubscriptionBuilder<E> {
    pub(crate) fn new(bus: Arc<BusShared>) -> Self {
        Self {
            bus,
            topics: TopicSet::new(),
            event_types: Vec::new(),
            filter: None,
            incompatible: None,
            _consumer: PhantomData,
        }
    }

    /// Adds a source id or trailing-wildcard pattern. Group ids are valid
    /// topics and match every member of the group.
    pub fn with_topic_id(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    pub fn with_topic_ids<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for topic in topics {
            self.topics.insert(topic.into());
        }
        self
    }

    /// Subscribes to the exact source id of a known producer.
    pub fn with_source(mut self, source: &EventSourceInfo) -> Self {
        self.topics
            .insert(TopicPattern::Exact(source.source_id().to_string()));
        self
    }

    pub fn with_sources<'a, I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = &'a EventSourceInfo>,
    {
        for source in sources {
            self = self.with_source(source);
        }
        self
    }

    /// Restricts delivery to events of type `T` or of the family `T`.
    /// Multiple calls accept the union.
    pub fn with_event_type<T: ?Sized + 'static>(mut self) -> Self {
        let requested = EventType::of::<T>();
        if let Some(base) = E::base_type() {
            if base != requested {
                self.incompatible.get_or_insert(requested);
            }
        }
        if !self.event_types.contains(&requested) {
            self.event_types.push(requested);
        }
        self
    }

    /// Adds a predicate. Multiple predicates must all accept.
    pub fn with_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let typed: EventPredicate = Arc::new(move |event: &dyn Event| {
            E::cast_ref(event).is_some_and(|event| predicate(event))
        });
        self.filter = Some(match self.filter.take() {
            Some(previous) => Arc::new(move |event: &dyn Event| previous(event) && typed(event)),
            None => typed,
        });
        self
    }

    fn into_parts(self) -> Result<(Arc<BusShared>, SubscriptionSpec), ConfigurationError> {
        if self.topics.is_empty() {
            return Err(ConfigurationError::NoTopics);
        }
        if let Some(requested) = self.incompatible {
            return Err(ConfigurationError::IncompatibleEventType {
                requested: requested.name(),
                base: E::base_type().map_or("dyn Event", |base| base.name()),
            });
        }
        let event_types = if self.event_types.is_empty() {
            E::base_type().into_iter().collect()
        } else {
            self.event_types
        };
        Ok((
            self.bus,
            SubscriptionSpec {
                topics: self.topics,
                event_types,
                filter: self.filter,
                castable: E::castable,
            },
        ))
    }

    /// Registers `subscriber`. The returned future resolves once the
    /// subscription is active in the routing table.
    pub fn subscribe<S>(self, subscriber: S) -> Result<SubscribeFuture, BusError>
    where
        S: Subscriber<E>,
    {
        let (bus, spec) = self.into_parts()?;
        bus.submit::<E>(spec, Box::new(subscriber))
    }

    /// Subscribes a closure with unbounded demand.
    pub fn subscribe_fn<N>(self, on_next: N) -> Result<SubscribeFuture, BusError>
    where
        N: FnMut(Arc<E>) + Send + 'static,
    {
        self.subscribe(CallbackSubscriber::new(on_next))
    }

    pub fn subscribe_fn_with_error<N, R>(
        self,
        on_next: N,
        on_error: R,
    ) -> Result<SubscribeFuture, BusError>
    where
        N: FnMut(Arc<E>) + Send + 'static,
        R: FnMut(DeliveryError) + Send + 'static,
    {
        self.subscribe(CallbackSubscriber::new(on_next).with_error(on_error))
    }

    pub fn subscribe_fn_with_handlers<N, R, C>(
        self,
        on_next: N,
        on_error: R,
        on_complete: C,
    ) -> Result<SubscribeFuture, BusError>
    where
        N: FnMut(Arc<E>) + Send + 'static,
        R: FnMut(DeliveryError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.subscribe(
            CallbackSubscriber::new(on_next)
                .with_error(on_error)
                .with_complete(on_complete),
        )
    }

    /// Plain consumer callback with unbounded demand.
    pub fn consume<N>(self, mut on_next: N) -> Result<SubscribeFuture, BusError>
    where
        N: FnMut(&E) + Send + 'static,
    {
        self.subscribe(CallbackSubscriber::new(move |event: Arc<E>| on_next(&*event)))
    }

    /// Subscribes and exposes events as an async stream. At most
    /// `capacity` events are in flight between the bus and the stream.
    pub async fn into_stream(self, capacity: usize) -> Result<EventStream<E>, BusError> {
        let (subscriber, receiver) = ChannelSubscriber::new(capacity);
        let subscription = self.subscribe(subscriber)?.await?;
        Ok(EventStream::new(receiver, subscription))
    }
}

/// Resolves to the active subscription handle.
///
/// Resolves to a lifecycle error if the bus shuts down first.
#[must_use = "futures do nothing unless polled"]
pub struct SubscribeFuture {
    ready: oneshot::Receiver<Result<Subscription, BusError>>,
}

impl SubscribeFuture {
    pub(crate) fn new(ready: oneshot::Receiver<Result<Subscription, BusError>>) -> Self {
        Self { ready }
    }
}

impl Future for SubscribeFuture {
    type Output = Result<Subscription, BusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.ready).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BusError::lifecycle("subscribe"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

//! Subscriptions and the demand protocol.
//!
//! A subscription owns a bounded FIFO buffer. Publishers only ever append
//! to it; a dedicated delivery task drains it as the consumer signals
//! demand through [`Subscription::request`]. A full buffer never blocks the
//! producer: the event is dropped for that subscription alone, or replaces
//! the oldest buffered event when the publisher's drop handler asks for it.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::bus::BusShared;
use crate::error::{panic_message, DeliveryError};
use crate::event::{Event, EventType};
use crate::metrics::BusMetrics;
use crate::topic::TopicSet;

/// Demand value meaning "deliver everything". Never decremented.
pub const UNBOUNDED_DEMAND: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubscriptionState {
    Building = 0,
    Active = 1,
    Cancelled = 2,
    Completed = 3,
    Errored = 4,
}

impl SubscriptionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Building,
            1 => Self::Active,
            2 => Self::Cancelled,
            3 => Self::Completed,
            _ => Self::Errored,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do with an event that does not fit in a subscription's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropAction {
    /// Drop the new event for this subscription.
    #[default]
    Discard,
    /// Evict the oldest buffered event and enqueue the new one.
    ReplaceOldest,
}

/// Called by a publisher when a subscription cannot accept an event.
pub type DropHandler = Arc<dyn Fn(&Subscription, &Arc<dyn Event>) -> DropAction + Send + Sync>;

pub(crate) type EventPredicate = Arc<dyn Fn(&dyn Event) -> bool + Send + Sync>;

/// Consumer side of a subscription.
///
/// All callbacks run on the blocking thread pool, one at a time per
/// subscription, so implementations may block without stalling publishers
/// or other subscriptions.
pub trait Subscriber<E: ?Sized>: Send + 'static {
    /// First callback after activation. Nothing is delivered until the
    /// consumer requests demand through the handle.
    fn on_subscribe(&mut self, subscription: Subscription);

    fn on_next(&mut self, event: Arc<E>);

    /// The subscription failed. No further callbacks follow.
    fn on_error(&mut self, error: DeliveryError) {
        warn!(error = %error, "Subscription failed without an error handler");
    }

    /// The bus shut down. No further callbacks follow.
    fn on_complete(&mut self) {}
}

type ErrorFn = Box<dyn FnMut(DeliveryError) + Send>;
type CompleteFn = Box<dyn FnOnce() + Send>;

/// Closure-backed subscriber with unbounded demand.
pub struct CallbackSubscriber<E: ?Sized> {
    on_next: Box<dyn FnMut(Arc<E>) + Send>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl<E: ?Sized> CallbackSubscriber<E> {
    pub fn new(on_next: impl FnMut(Arc<E>) + Send + 'static) -> Self {
        Self {
            on_next: Box::new(on_next),
            on_error: None,
            on_complete: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, on_error: impl FnMut(DeliveryError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    #[must_use]
    pub fn with_complete(mut self, on_complete: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(on_complete));
        self
    }
}

impl<E: ?Sized + Send + Sync + 'static> Subscriber<E> for CallbackSubscriber<E> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(UNBOUNDED_DEMAND);
    }

    fn on_next(&mut self, event: Arc<E>) {
        (self.on_next)(event);
    }

    fn on_error(&mut self, error: DeliveryError) {
        match self.on_error.as_mut() {
            Some(handler) => handler(error),
            None => warn!(error = %error, "Subscription failed without an error handler"),
        }
    }

    fn on_complete(&mut self) {
        if let Some(handler) = self.on_complete.take() {
            handler();
        }
    }
}

/// Validated subscription parameters.
pub(crate) struct SubscriptionSpec {
    pub(crate) topics: TopicSet,
    pub(crate) event_types: Vec<EventType>,
    pub(crate) filter: Option<EventPredicate>,
    /// Rejects events the consumer type cannot receive.
    pub(crate) castable: fn(&dyn Event) -> bool,
}

/// Result of offering an event to one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    Replaced,
    Dropped,
    Rejected,
}

pub(crate) struct SubscriptionCore {
    id: SubscriptionId,
    topics: TopicSet,
    event_types: Vec<EventType>,
    filter: Option<EventPredicate>,
    castable: fn(&dyn Event) -> bool,
    state: AtomicU8,
    demand: AtomicU64,
    buffer: Mutex<VecDeque<Arc<dyn Event>>>,
    capacity: usize,
    overflowing: AtomicBool,
    fault: Mutex<Option<DeliveryError>>,
    wake: Notify,
    bus: Weak<BusShared>,
    metrics: Arc<BusMetrics>,
}

impl SubscriptionCore {
    pub(crate) fn new(
        spec: SubscriptionSpec,
        capacity: usize,
        bus: Weak<BusShared>,
        metrics: Arc<BusMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriptionId::new(),
            topics: spec.topics,
            event_types: spec.event_types,
            filter: spec.filter,
            castable: spec.castable,
            state: AtomicU8::new(SubscriptionState::Building as u8),
            demand: AtomicU64::new(0),
            buffer: Mutex::new(VecDeque::new()),
            capacity,
            overflowing: AtomicBool::new(false),
            fault: Mutex::new(None),
            wake: Notify::new(),
            bus,
            metrics,
        })
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub(crate) fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// `Building -> Active`. Fails if the subscription was already closed.
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SubscriptionState::Building as u8,
                SubscriptionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves into a terminal state unless already in one.
    fn close(&self, target: SubscriptionState) -> bool {
        let closed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                if SubscriptionState::from_u8(raw).is_terminal() {
                    None
                } else {
                    Some(target as u8)
                }
            })
            .is_ok();
        if closed {
            self.metrics.record_subscription_closed(target.as_str());
        }
        closed
    }

    pub(crate) fn cancel(&self) -> bool {
        if !self.close(SubscriptionState::Cancelled) {
            return false;
        }
        self.wake.notify_one();
        debug!(subscription_id = %self.id, "Subscription cancelled");
        self.detach();
        true
    }

    /// Forced completion at bus shutdown. The routing table is cleared by
    /// the caller.
    pub(crate) fn complete(&self) -> bool {
        if !self.close(SubscriptionState::Completed) {
            return false;
        }
        self.wake.notify_one();
        true
    }

    /// Records a consumer fault. Only the first fault is kept and reported.
    pub(crate) fn fail(&self, fault: DeliveryError) -> bool {
        // Hold the slot across the transition so the worker never observes
        // `Errored` without its fault.
        let mut slot = self.fault.lock();
        if !self.close(SubscriptionState::Errored) {
            return false;
        }
        error!(subscription_id = %self.id, error = %fault, "Subscription errored");
        *slot = Some(fault);
        drop(slot);
        self.wake.notify_one();
        self.metrics.record_delivery_error();
        self.detach();
        true
    }

    pub(crate) fn take_fault(&self) -> Option<DeliveryError> {
        self.fault.lock().take()
    }

    fn detach(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.id);
        }
    }

    /// Whether events published by `source_id` (a member of `group_id`, if
    /// any) are routed to this subscription.
    pub(crate) fn watches(&self, source_id: &str, group_id: Option<&str>) -> bool {
        self.topics.matches(source_id) || group_id.is_some_and(|group| self.topics.matches(group))
    }

    /// Type and predicate checks. A panicking predicate errors the
    /// subscription.
    pub(crate) fn accepts(&self, event: &dyn Event) -> bool {
        if !self.event_types.is_empty()
            && !self
                .event_types
                .iter()
                .any(|event_type| event.is_instance_of(event_type))
        {
            return false;
        }
        if !(self.castable)(event) {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| filter(event))) {
            Ok(accepted) => accepted,
            Err(payload) => {
                self.fail(DeliveryError::FilterPanicked {
                    source_id: event.source_id().to_string(),
                    message: panic_message(&*payload),
                });
                false
            }
        }
    }

    /// Appends `event` to the buffer without blocking.
    pub(crate) fn offer(
        self: &Arc<Self>,
        event: &Arc<dyn Event>,
        route_id: &str,
        on_drop: Option<&DropHandler>,
    ) -> Offer {
        if !self.is_active() {
            return Offer::Rejected;
        }
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() < self.capacity {
                buffer.push_back(Arc::clone(event));
                drop(buffer);
                self.overflowing.store(false, Ordering::Relaxed);
                self.wake.notify_one();
                return Offer::Queued;
            }
        }

        let action = match on_drop {
            Some(handler) => {
                let handle = Subscription::new(Arc::clone(self));
                catch_unwind(AssertUnwindSafe(|| handler(&handle, event))).unwrap_or_else(|payload| {
                    warn!(
                        subscription_id = %self.id,
                        error = %panic_message(&*payload),
                        "Drop handler panicked, discarding event"
                    );
                    DropAction::Discard
                })
            }
            None => DropAction::Discard,
        };

        self.metrics.record_dropped(route_id);
        if !self.overflowing.swap(true, Ordering::Relaxed) {
            warn!(
                subscription_id = %self.id,
                source_id = %route_id,
                queue_size = self.capacity,
                action = ?action,
                "Subscription buffer full, dropping events"
            );
        } else {
            trace!(subscription_id = %self.id, source_id = %route_id, "Dropped event");
        }

        match action {
            DropAction::Discard => Offer::Dropped,
            DropAction::ReplaceOldest => {
                let mut buffer = self.buffer.lock();
                if buffer.len() >= self.capacity {
                    buffer.pop_front();
                }
                buffer.push_back(Arc::clone(event));
                drop(buffer);
                self.wake.notify_one();
                Offer::Replaced
            }
        }
    }

    pub(crate) fn request(&self, n: u64) {
        if n == 0 {
            warn!(subscription_id = %self.id, "Ignoring request for zero events");
            return;
        }
        if self.state().is_terminal() {
            return;
        }
        let _ = self
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |demand| {
                Some(demand.saturating_add(n))
            });
        self.wake.notify_one();
    }

    pub(crate) fn demand(&self) -> u64 {
        self.demand.load(Ordering::Acquire)
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Removes up to `min(buffered, demand, max)` events from the front of
    /// the buffer and charges them against demand.
    pub(crate) fn take_ready(&self, max: usize) -> Vec<Arc<dyn Event>> {
        let mut buffer = self.buffer.lock();
        let demand = self.demand.load(Ordering::Acquire);
        if buffer.is_empty() || demand == 0 {
            return Vec::new();
        }
        let allowed = usize::try_from(demand).unwrap_or(usize::MAX);
        let count = buffer.len().min(max).min(allowed);
        let batch: Vec<_> = buffer.drain(..count).collect();
        drop(buffer);

        let taken = batch.len() as u64;
        let _ = self
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |demand| {
                if demand == UNBOUNDED_DEMAND {
                    None
                } else {
                    Some(demand.saturating_sub(taken))
                }
            });
        batch
    }

    pub(crate) async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    pub(crate) fn clear_buffer(&self) {
        self.buffer.lock().clear();
    }
}

impl fmt::Debug for SubscriptionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCore")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("state", &self.state())
            .field("demand", &self.demand())
            .finish_non_exhaustive()
    }
}

/// Handle to an active subscription. Cheap to clone.
#[derive(Clone)]
pub struct Subscription {
    core: Arc<SubscriptionCore>,
}

impl Subscription {
    pub(crate) fn new(core: Arc<SubscriptionCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> SubscriptionId {
        self.core.id()
    }

    pub fn state(&self) -> SubscriptionState {
        self.core.state()
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Adds `n` to outstanding demand, saturating at [`UNBOUNDED_DEMAND`].
    /// `request(0)` is ignored.
    pub fn request(&self, n: u64) {
        self.core.request(n);
    }

    /// Stops delivery and detaches from all publishers. At most one event
    /// already handed to the consumer may still complete.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn demand(&self) -> u64 {
        self.core.demand()
    }

    /// Events waiting for demand.
    pub fn buffered(&self) -> usize {
        self.core.buffered()
    }

    pub fn topics(&self) -> &TopicSet {
        self.core.topics()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("topics", &self.topics().to_string())
            .finish()
    }
}

/// Copy-on-write list of subscriptions attached to one route.
///
/// Readers clone the current `Arc` under a shared lock and iterate without
/// holding it; writers replace the whole vector.
#[derive(Default)]
pub(crate) struct SubscriberList {
    inner: RwLock<Arc<Vec<Arc<SubscriptionCore>>>>,
}

impl SubscriberList {
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<SubscriptionCore>>> {
        Arc::clone(&self.inner.read())
    }

    pub(crate) fn add(&self, core: &Arc<SubscriptionCore>) -> bool {
        let mut guard = self.inner.write();
        if guard.iter().any(|existing| existing.id() == core.id()) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Arc::clone(core));
        *guard = Arc::new(next);
        true
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut guard = self.inner.write();
        if !guard.iter().any(|existing| existing.id() == id) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|existing| existing.id() != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub(crate) fn clear(&self) {
        *self.inner.write() = Arc::new(Vec::new());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub(crate) fn count_active(&self, mut watched: impl FnMut(&SubscriptionCore) -> bool) -> usize {
        self.snapshot()
            .iter()
            .filter(|core| {
                let core: &SubscriptionCore = core;
                core.is_active() && watched(core)
            })
            .count()
    }
}

/// Offers `event` to every subscription in `subscribers` that `watched`
/// selects and whose type and predicate accept it. Returns how many
/// subscriptions took the event.
pub(crate) fn fan_out(
    subscribers: &[Arc<SubscriptionCore>],
    event: &Arc<dyn Event>,
    route_id: &str,
    on_drop: Option<&DropHandler>,
    mut watched: impl FnMut(&SubscriptionCore) -> bool,
) -> usize {
    let mut accepted = 0;
    for core in subscribers {
        if !core.is_active() || !watched(&**core) || !core.accepts(event.as_ref()) {
            continue;
        }
        match core.offer(event, route_id, on_drop) {
            Offer::Queued | Offer::Replaced => accepted += 1,
            Offer::Dropped | Offer::Rejected => {}
        }
    }
    trace!(source_id = %route_id, subscribers = accepted, "Routed event");
    accepted
}

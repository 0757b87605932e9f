//! Event bus registry and lifecycle.
//!
//! The routing table maps source ids to publishers and group ids to
//! groups, and keeps the list of active subscriptions so that publishers
//! created later are attached to every subscription that already matches
//! them. All routing mutations take the table's write lock; publishing
//! only reads per-route snapshots and never touches it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace};

use crate::builder::{SubscribeFuture, SubscriptionBuilder};
use crate::config::BusConfig;
use crate::delivery::{self, DeliverySettings};
use crate::error::{BusError, ConfigurationError};
use crate::event::{Event, EventCast};
use crate::group::GroupCore;
use crate::metrics::{BusMetrics, MetricsRecorder, MetricsSnapshot, NoOpMetrics};
use crate::publisher::{Publisher, Route};
use crate::source::EventSourceInfo;
use crate::subscription::{
    Subscriber, SubscriberList, Subscription, SubscriptionCore, SubscriptionId, SubscriptionSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Created,
    Running,
    ShutDown,
}

impl BusState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::ShutDown,
        }
    }
}

/// Bus state shared with publishers so they can refuse work after shutdown
/// without holding the bus itself.
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    fn new() -> Self {
        Self(AtomicU8::new(BusState::Created as u8))
    }

    pub(crate) fn state(&self) -> BusState {
        BusState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: BusState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn ensure_open(&self, operation: &'static str) -> Result<(), BusError> {
        match self.state() {
            BusState::ShutDown => Err(BusError::lifecycle(operation)),
            BusState::Created | BusState::Running => Ok(()),
        }
    }
}

type Launch = Box<dyn FnOnce(&Handle) + Send>;

/// A subscription waiting for the bus to run.
struct PendingSubscription {
    core: Arc<SubscriptionCore>,
    launch: Launch,
    ready: oneshot::Sender<Result<Subscription, BusError>>,
}

#[derive(Default)]
struct RoutingTable {
    publishers: HashMap<Arc<str>, Publisher>,
    groups: HashMap<Arc<str>, Arc<GroupCore>>,
    active: Vec<Arc<SubscriptionCore>>,
}

pub(crate) struct BusShared {
    config: BusConfig,
    lifecycle: Arc<Lifecycle>,
    routing: RwLock<RoutingTable>,
    // Always locked after `routing`.
    pending: Mutex<Vec<PendingSubscription>>,
    runtime: OnceLock<Handle>,
    shutdown_signal: watch::Sender<bool>,
    metrics: Arc<BusMetrics>,
}

impl BusShared {
    pub(crate) fn submit<E>(
        self: &Arc<Self>,
        spec: SubscriptionSpec,
        subscriber: Box<dyn Subscriber<E>>,
    ) -> Result<SubscribeFuture, BusError>
    where
        E: ?Sized + EventCast,
    {
        let core = SubscriptionCore::new(
            spec,
            self.config.subscription_buffer_capacity,
            Arc::downgrade(self),
            Arc::clone(&self.metrics),
        );
        let settings = DeliverySettings::from_config(&self.config);
        let worker_core = Arc::clone(&core);
        let launch: Launch = Box::new(move |runtime: &Handle| {
            runtime.spawn(delivery::run(worker_core, subscriber, settings));
        });
        let (ready, receiver) = oneshot::channel();
        let pending = PendingSubscription {
            core,
            launch,
            ready,
        };

        let mut table = self.routing.write();
        match self.lifecycle.state() {
            BusState::ShutDown => return Err(BusError::lifecycle("subscribe")),
            BusState::Created => {
                debug!(
                    subscription_id = %pending.core.id(),
                    "Subscription pending until the bus starts"
                );
                self.pending.lock().push(pending);
            }
            BusState::Running => {
                let runtime = self.runtime.get().ok_or(BusError::NoRuntime)?;
                self.activate(&mut table, pending, runtime);
            }
        }
        Ok(SubscribeFuture::new(receiver))
    }

    /// Inserts the subscription into the routing table, attaches it to
    /// every matching publisher and group and starts its delivery task.
    fn activate(&self, table: &mut RoutingTable, pending: PendingSubscription, runtime: &Handle) {
        let PendingSubscription {
            core,
            launch,
            ready,
        } = pending;
        if !core.activate() {
            let _ = ready.send(Err(BusError::lifecycle("subscribe")));
            return;
        }

        for publisher in table.publishers.values() {
            if let Some(subscribers) = publisher.direct_subscribers() {
                if core.watches(publisher.source_id(), None) {
                    subscribers.add(&core);
                }
            }
        }
        for group in table.groups.values() {
            if group.is_watched_by(&core) {
                group.subscribers().add(&core);
            }
        }
        table.active.push(Arc::clone(&core));
        self.metrics.record_subscription_activated();
        debug!(
            subscription_id = %core.id(),
            topics = %core.topics(),
            "Subscription activated"
        );

        launch(runtime);
        if ready.send(Ok(Subscription::new(core))).is_err() {
            trace!("Activation future dropped before completion");
        }
    }

    /// Removes a subscription from every route.
    pub(crate) fn detach(&self, id: SubscriptionId) {
        let mut table = self.routing.write();
        table.active.retain(|core| core.id() != id);
        for publisher in table.publishers.values() {
            if let Some(subscribers) = publisher.direct_subscribers() {
                subscribers.remove(id);
            }
        }
        for group in table.groups.values() {
            group.subscribers().remove(id);
        }
    }

    fn shutdown(&self) -> bool {
        let (active, pending) = {
            let mut table = self.routing.write();
            if self.lifecycle.state() == BusState::ShutDown {
                return false;
            }
            self.lifecycle.set(BusState::ShutDown);
            for publisher in table.publishers.values() {
                if let Some(subscribers) = publisher.direct_subscribers() {
                    subscribers.clear();
                }
            }
            for group in table.groups.values() {
                group.subscribers().clear();
            }
            let active = std::mem::take(&mut table.active);
            let pending = std::mem::take(&mut *self.pending.lock());
            (active, pending)
        };

        self.shutdown_signal.send_replace(true);
        for core in &active {
            core.complete();
        }
        for pending in pending {
            let _ = pending.ready.send(Err(BusError::lifecycle("subscribe")));
        }
        info!(completed_subscriptions = active.len(), "Event bus shut down");
        true
    }
}

impl Drop for BusShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// In-process publish/subscribe bus.
///
/// Cloning yields another handle to the same bus. Dropping the last handle
/// shuts the bus down.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        Self::with_recorder(config, Arc::new(NoOpMetrics))
    }

    /// Creates a bus that mirrors its counters into `recorder`.
    pub fn with_recorder(
        config: BusConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self::build(config, recorder))
    }

    fn build(config: BusConfig, recorder: Arc<dyn MetricsRecorder>) -> Self {
        let (shutdown_signal, _) = watch::channel(false);
        Self {
            shared: Arc::new(BusShared {
                config,
                lifecycle: Arc::new(Lifecycle::new()),
                routing: RwLock::new(RoutingTable::default()),
                pending: Mutex::new(Vec::new()),
                runtime: OnceLock::new(),
                shutdown_signal,
                metrics: Arc::new(BusMetrics::new(recorder)),
            }),
        }
    }

    pub fn state(&self) -> BusState {
        self.shared.lifecycle.state()
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Starts routing on the current tokio runtime.
    ///
    /// Spawns group dispatchers and activates subscriptions built before
    /// the call. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<(), BusError> {
        let current = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let shared = &self.shared;
        let mut table = shared.routing.write();
        match shared.lifecycle.state() {
            BusState::Running => return Ok(()),
            BusState::ShutDown => return Err(BusError::lifecycle("start")),
            BusState::Created => {}
        }

        let runtime = shared.runtime.get_or_init(|| current);
        shared.lifecycle.set(BusState::Running);
        for group in table.groups.values() {
            group.spawn_dispatcher(runtime, shared.shutdown_signal.subscribe());
        }
        let pending = std::mem::take(&mut *shared.pending.lock());
        let activated = pending.len();
        for subscription in pending {
            shared.activate(&mut table, subscription, runtime);
        }
        info!(
            publishers = table.publishers.len(),
            groups = table.groups.len(),
            activated_subscriptions = activated,
            "Event bus started"
        );
        Ok(())
    }

    /// Completes every subscription and refuses further operations.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Returns the publisher for `source_id`, creating it on first use.
    ///
    /// An existing grouped publisher is returned as is.
    pub fn get_publisher(&self, source_id: &str) -> Result<Publisher, BusError> {
        self.shared.lifecycle.ensure_open("get publisher")?;
        if source_id.is_empty() {
            return Err(ConfigurationError::EmptySourceId.into());
        }
        if let Some(existing) = self.shared.routing.read().publishers.get(source_id) {
            return Ok(existing.clone());
        }

        let mut table = self.shared.routing.write();
        self.shared.lifecycle.ensure_open("get publisher")?;
        if let Some(existing) = table.publishers.get(source_id) {
            return Ok(existing.clone());
        }

        let source_id: Arc<str> = Arc::from(source_id);
        let publisher = Publisher::new(
            Arc::clone(&source_id),
            Route::Direct(SubscriberList::default()),
            Arc::clone(&self.shared.lifecycle),
            Arc::clone(&self.shared.metrics),
        );
        if let Some(subscribers) = publisher.direct_subscribers() {
            for core in table.active.iter().filter(|core| core.watches(&source_id, None)) {
                subscribers.add(core);
            }
        }
        table.publishers.insert(Arc::clone(&source_id), publisher.clone());
        debug!(
            source_id = %source_id,
            subscribers = publisher.number_of_subscribers(),
            "Created publisher"
        );
        Ok(publisher)
    }

    /// Returns the publisher for `source_id` as a member of `group_id`,
    /// creating the group and the publisher on first use.
    pub fn get_group_publisher(
        &self,
        group_id: &str,
        source_id: &str,
    ) -> Result<Publisher, BusError> {
        self.shared.lifecycle.ensure_open("get publisher")?;
        if group_id.is_empty() || source_id.is_empty() {
            return Err(ConfigurationError::EmptySourceId.into());
        }
        if let Some(existing) = self.shared.routing.read().publishers.get(source_id) {
            return same_group(existing, group_id);
        }

        let mut table = self.shared.routing.write();
        self.shared.lifecycle.ensure_open("get publisher")?;
        if let Some(existing) = table.publishers.get(source_id) {
            return same_group(existing, group_id);
        }

        let group = match table.groups.get(group_id) {
            Some(group) => Arc::clone(group),
            None => {
                let group = GroupCore::new(Arc::from(group_id));
                if self.shared.lifecycle.state() == BusState::Running {
                    if let Some(runtime) = self.shared.runtime.get() {
                        group.spawn_dispatcher(runtime, self.shared.shutdown_signal.subscribe());
                    }
                }
                table.groups.insert(Arc::from(group_id), Arc::clone(&group));
                debug!(group_id = %group_id, "Created publisher group");
                group
            }
        };

        let source_id: Arc<str> = Arc::from(source_id);
        group.add_member(Arc::clone(&source_id));
        for core in table
            .active
            .iter()
            .filter(|core| core.watches(&source_id, Some(group_id)))
        {
            group.subscribers().add(core);
        }

        let publisher = Publisher::new(
            Arc::clone(&source_id),
            Route::Grouped(group),
            Arc::clone(&self.shared.lifecycle),
            Arc::clone(&self.shared.metrics),
        );
        table.publishers.insert(Arc::clone(&source_id), publisher.clone());
        debug!(group_id = %group_id, source_id = %source_id, "Created group member publisher");
        Ok(publisher)
    }

    /// Resolves a routing descriptor to its publisher.
    pub fn publisher_for(&self, info: &EventSourceInfo) -> Result<Publisher, BusError> {
        match info.group_id() {
            Some(group_id) => self.get_group_publisher(group_id, info.source_id()),
            None => self.get_publisher(info.source_id()),
        }
    }

    /// Starts a subscription receiving every event type.
    pub fn new_subscription(&self) -> Result<SubscriptionBuilder, BusError> {
        self.shared.lifecycle.ensure_open("subscribe")?;
        Ok(SubscriptionBuilder::new(Arc::clone(&self.shared)))
    }

    /// Starts a subscription receiving only events of type `T`.
    pub fn new_subscription_of<T: Event>(&self) -> Result<SubscriptionBuilder<T>, BusError> {
        self.shared.lifecycle.ensure_open("subscribe")?;
        Ok(SubscriptionBuilder::new(Arc::clone(&self.shared)))
    }

    /// Active subscriptions routed to `source_id`, including those
    /// subscribed through its group. A point-in-time hint.
    pub fn number_of_subscribers(&self, source_id: &str) -> Result<usize, BusError> {
        self.shared.lifecycle.ensure_open("count subscribers")?;
        let table = self.shared.routing.read();
        let group_id = table.publishers.get(source_id).and_then(Publisher::group_id);
        Ok(table
            .active
            .iter()
            .filter(|core| core.is_active() && core.watches(source_id, group_id))
            .count())
    }

    /// Member source ids of `group_id`, if the group exists.
    pub fn group_members(&self, group_id: &str) -> Result<Option<Vec<String>>, BusError> {
        self.shared.lifecycle.ensure_open("list group members")?;
        let table = self.shared.routing.read();
        Ok(table.groups.get(group_id).map(|group| {
            group
                .members()
                .iter()
                .map(|member| member.to_string())
                .collect()
        }))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::build(BusConfig::default(), Arc::new(NoOpMetrics))
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.shared.routing.read();
        f.debug_struct("EventBus")
            .field("state", &self.state())
            .field("publishers", &table.publishers.len())
            .field("groups", &table.groups.len())
            .field("active_subscriptions", &table.active.len())
            .finish()
    }
}

fn same_group(existing: &Publisher, group_id: &str) -> Result<Publisher, BusError> {
    if existing.group_id() == Some(group_id) {
        return Ok(existing.clone());
    }
    Err(ConfigurationError::GroupConflict {
        source_id: existing.source_id().to_string(),
        existing: existing
            .group_id()
            .map_or_else(|| "no group".to_string(), |group| format!("group {group}")),
        requested: format!("group {group_id}"),
    }
    .into())
}

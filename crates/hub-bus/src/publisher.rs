//! Publishers.
//!
//! There is one publisher per source id. An ungrouped publisher fans out
//! on the caller's thread over a copy-on-write snapshot of its
//! subscriptions. A grouped publisher hands the event to its group's
//! dispatcher so that all members share one delivery order.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::bus::Lifecycle;
use crate::error::BusError;
use crate::event::Event;
use crate::group::GroupCore;
use crate::metrics::BusMetrics;
use crate::subscription::{fan_out, DropAction, DropHandler, SubscriberList, Subscription};

pub(crate) enum Route {
    Direct(SubscriberList),
    Grouped(Arc<GroupCore>),
}

struct PublisherCore {
    source_id: Arc<str>,
    route: Route,
    lifecycle: Arc<Lifecycle>,
    metrics: Arc<BusMetrics>,
}

/// Publishing handle for one source id. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    core: Arc<PublisherCore>,
}

impl Publisher {
    pub(crate) fn new(
        source_id: Arc<str>,
        route: Route,
        lifecycle: Arc<Lifecycle>,
        metrics: Arc<BusMetrics>,
    ) -> Self {
        Self {
            core: Arc::new(PublisherCore {
                source_id,
                route,
                lifecycle,
                metrics,
            }),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.core.source_id
    }

    pub fn group_id(&self) -> Option<&str> {
        match &self.core.route {
            Route::Direct(_) => None,
            Route::Grouped(group) => Some(group.group_id()),
        }
    }

    pub(crate) fn direct_subscribers(&self) -> Option<&SubscriberList> {
        match &self.core.route {
            Route::Direct(subscribers) => Some(subscribers),
            Route::Grouped(_) => None,
        }
    }

    /// Publishes `event` to every matching active subscription.
    ///
    /// Never blocks on consumers. Fails only once the bus is shut down.
    pub fn publish<T: Event>(&self, event: T) -> Result<(), BusError> {
        self.dispatch(Arc::new(event), None)
    }

    /// Publishes an already shared event.
    pub fn publish_shared(&self, event: Arc<dyn Event>) -> Result<(), BusError> {
        self.dispatch(event, None)
    }

    /// Publishes `event`, consulting `on_drop` for each subscription whose
    /// buffer is full.
    pub fn publish_with<T, F>(&self, event: T, on_drop: F) -> Result<(), BusError>
    where
        T: Event,
        F: Fn(&Subscription, &Arc<dyn Event>) -> DropAction + Send + Sync + 'static,
    {
        let on_drop: DropHandler = Arc::new(on_drop);
        self.dispatch(Arc::new(event), Some(on_drop))
    }

    fn dispatch(&self, event: Arc<dyn Event>, on_drop: Option<DropHandler>) -> Result<(), BusError> {
        self.core.lifecycle.ensure_open("publish")?;
        self.core.metrics.record_published(&self.core.source_id);

        match &self.core.route {
            Route::Direct(subscribers) => {
                let snapshot = subscribers.snapshot();
                if snapshot.is_empty() {
                    trace!(source_id = %self.core.source_id, "No subscribers");
                    return Ok(());
                }
                fan_out(
                    &snapshot,
                    &event,
                    &self.core.source_id,
                    on_drop.as_ref(),
                    |_| true,
                );
            }
            Route::Grouped(group) => {
                group.enqueue(Arc::clone(&self.core.source_id), event, on_drop);
            }
        }
        Ok(())
    }

    /// Active subscriptions currently routed to this source.
    pub fn number_of_subscribers(&self) -> usize {
        match &self.core.route {
            Route::Direct(subscribers) => subscribers.count_active(|_| true),
            Route::Grouped(group) => group.count_watching(&self.core.source_id),
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("source_id", &self.source_id())
            .field("group_id", &self.group_id())
            .finish()
    }
}

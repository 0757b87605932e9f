//! Shared fixtures for the integration tests and benchmarks.

use std::sync::Arc;
use std::time::Duration;

use hub_bus::{Event, EventBus, EventHeader, Subscriber, Subscription};
use parking_lot::Mutex;

/// Default guard for anything that waits on delivery.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal text-carrying event.
#[derive(Debug, Clone)]
pub struct TextEvent {
    header: EventHeader,
    pub text: String,
}

impl TextEvent {
    pub fn new(source_id: &str, text: impl Into<String>) -> Self {
        Self {
            header: EventHeader::new(source_id).unwrap_or_else(|e| panic!("bad source id: {e}")),
            text: text.into(),
        }
    }
}

impl Event for TextEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// Event carrying its producer and per-producer sequence number.
#[derive(Debug, Clone)]
pub struct SeqEvent {
    header: EventHeader,
    pub seq: usize,
}

impl SeqEvent {
    pub fn new(source_id: &str, seq: usize) -> Self {
        Self {
            header: EventHeader::new(source_id).unwrap_or_else(|e| panic!("bad source id: {e}")),
            seq,
        }
    }
}

impl Event for SeqEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A bus already started on the current runtime.
pub fn running_bus() -> EventBus {
    let bus = EventBus::default();
    bus.start().unwrap_or_else(|e| panic!("bus failed to start: {e}"));
    bus
}

/// Polls `condition` until it holds, panicking after [`WAIT_TIMEOUT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within {WAIT_TIMEOUT:?}");
}

/// Shared list of everything a subscriber received.
#[derive(Debug)]
pub struct Received<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Received<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Received<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Received<T> {
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

/// Subscriber that requests a fixed demand up front and exposes its handle.
pub struct ManualSubscriber<E: ?Sized> {
    initial_demand: u64,
    handle: Arc<Mutex<Option<Subscription>>>,
    received: Received<Arc<E>>,
}

impl<E: ?Sized> ManualSubscriber<E> {
    pub fn new(
        initial_demand: u64,
    ) -> (Self, Arc<Mutex<Option<Subscription>>>, Received<Arc<E>>) {
        let handle = Arc::new(Mutex::new(None));
        let received = Received::default();
        let subscriber = Self {
            initial_demand,
            handle: Arc::clone(&handle),
            received: received.clone(),
        };
        (subscriber, handle, received)
    }
}

impl<E: ?Sized + Send + Sync + 'static> Subscriber<E> for ManualSubscriber<E> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(self.initial_demand);
        *self.handle.lock() = Some(subscription);
    }

    fn on_next(&mut self, event: Arc<E>) {
        self.received.push(event);
    }
}

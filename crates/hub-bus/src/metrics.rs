//! Bus counters and an exporter seam.
//!
//! The bus always keeps its own atomic counters; an optional
//! [`MetricsRecorder`] receives the same events so an exporter can mirror
//! them without the bus depending on any metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives bus activity as it happens.
pub trait MetricsRecorder: Send + Sync {
    fn record_published(&self, _source_id: &str) {}

    fn record_delivered(&self, _count: u64) {}

    fn record_dropped(&self, _source_id: &str) {}

    fn record_delivery_error(&self) {}

    fn record_subscription_activated(&self) {}

    fn record_subscription_closed(&self, _terminal_state: &'static str) {}
}

/// Recorder that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {}

pub struct BusMetrics {
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    delivery_errors: AtomicU64,
    subscriptions_activated: AtomicU64,
    subscriptions_closed: AtomicU64,
    recorder: Arc<dyn MetricsRecorder>,
}

impl BusMetrics {
    pub fn new(recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            events_published: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            delivery_errors: AtomicU64::new(0),
            subscriptions_activated: AtomicU64::new(0),
            subscriptions_closed: AtomicU64::new(0),
            recorder,
        }
    }

    pub fn record_published(&self, source_id: &str) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.recorder.record_published(source_id);
    }

    pub fn record_delivered(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.events_delivered.fetch_add(count, Ordering::Relaxed);
        self.recorder.record_delivered(count);
    }

    pub fn record_dropped(&self, source_id: &str) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        self.recorder.record_dropped(source_id);
    }

    pub fn record_delivery_error(&self) {
        self.delivery_errors.fetch_add(1, Ordering::Relaxed);
        self.recorder.record_delivery_error();
    }

    pub fn record_subscription_activated(&self) {
        self.subscriptions_activated.fetch_add(1, Ordering::Relaxed);
        self.recorder.record_subscription_activated();
    }

    pub fn record_subscription_closed(&self, terminal_state: &'static str) {
        self.subscriptions_closed.fetch_add(1, Ordering::Relaxed);
        self.recorder.record_subscription_closed(terminal_state);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
            subscriptions_activated: self.subscriptions_activated.load(Ordering::Relaxed),
            subscriptions_closed: self.subscriptions_closed.load(Ordering::Relaxed),
        }
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new(Arc::new(NoOpMetrics))
    }
}

impl std::fmt::Debug for BusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BusMetrics").field(&self.snapshot()).finish()
    }
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub delivery_errors: u64,
    pub subscriptions_activated: u64,
    pub subscriptions_closed: u64,
}

impl MetricsSnapshot {
    /// Subscriptions activated and not yet closed.
    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions_activated
            .saturating_sub(self.subscriptions_closed)
    }
}

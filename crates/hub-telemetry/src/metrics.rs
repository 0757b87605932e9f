//! Prometheus metrics for the hub event bus.
//!
//! All metrics follow the naming convention: `hub_<component>_<metric>_<unit>`
//!
//! [`PrometheusRecorder`] plugs into [`hub_bus::EventBus::with_recorder`]
//! and mirrors bus activity into the registry below.

use hub_bus::MetricsRecorder;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every hub metric
    pub static ref REGISTRY: Registry = Registry::new();

    /// Events accepted by publishers
    pub static ref EVENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("hub_bus_events_published_total", "Events published on the bus"),
        &["source_id"]
    ).expect("metric creation failed");

    /// Events handed to consumer callbacks
    pub static ref EVENTS_DELIVERED: IntCounter = IntCounter::new(
        "hub_bus_events_delivered_total",
        "Events delivered to subscribers"
    ).expect("metric creation failed");

    /// Events dropped on full subscription buffers
    pub static ref EVENTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("hub_bus_events_dropped_total", "Events dropped on full subscription buffers"),
        &["source_id"]
    ).expect("metric creation failed");

    /// Subscriptions errored by a consumer or filter fault
    pub static ref DELIVERY_ERRORS: IntCounter = IntCounter::new(
        "hub_bus_delivery_errors_total",
        "Subscriptions terminated by a delivery fault"
    ).expect("metric creation failed");

    /// Subscriptions currently routed
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "hub_bus_active_subscriptions",
        "Subscriptions currently receiving events"
    ).expect("metric creation failed");

    /// Closed subscriptions by terminal state
    pub static ref SUBSCRIPTIONS_CLOSED: IntCounterVec = IntCounterVec::new(
        Opts::new("hub_bus_subscriptions_closed_total", "Subscriptions closed"),
        &["state"]  // state: cancelled/completed/errored
    ).expect("metric creation failed");
}

/// Handle proving the hub metrics are registered.
#[derive(Debug)]
pub struct MetricsHandle {
    registered: usize,
}

impl MetricsHandle {
    pub fn registered(&self) -> usize {
        self.registered
    }
}

/// Registers every hub metric with [`REGISTRY`].
///
/// Safe to call more than once; metrics already registered are kept.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(EVENTS_DELIVERED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
        Box::new(DELIVERY_ERRORS.clone()),
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(SUBSCRIPTIONS_CLOSED.clone()),
    ];

    let registered = metrics.len();
    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(MetricsHandle { registered })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Mirrors bus activity into the Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusRecorder;

impl MetricsRecorder for PrometheusRecorder {
    fn record_published(&self, source_id: &str) {
        EVENTS_PUBLISHED.with_label_values(&[source_id]).inc();
    }

    fn record_delivered(&self, count: u64) {
        EVENTS_DELIVERED.inc_by(count);
    }

    fn record_dropped(&self, source_id: &str) {
        EVENTS_DROPPED.with_label_values(&[source_id]).inc();
    }

    fn record_delivery_error(&self) {
        DELIVERY_ERRORS.inc();
    }

    fn record_subscription_activated(&self) {
        ACTIVE_SUBSCRIPTIONS.inc();
    }

    fn record_subscription_closed(&self, terminal_state: &'static str) {
        ACTIVE_SUBSCRIPTIONS.dec();
        SUBSCRIPTIONS_CLOSED.with_label_values(&[terminal_state]).inc();
    }
}

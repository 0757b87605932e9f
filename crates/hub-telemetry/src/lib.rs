//! # Hub Telemetry
//!
//! Logging and metrics for sensor hub processes.
//!
//! - Structured logging through `tracing-subscriber`, pretty for
//!   development and JSON for containers
//! - Prometheus counters fed by the event bus through [`PrometheusRecorder`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_telemetry::{init_telemetry, PrometheusRecorder, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! let bus = EventBus::with_recorder(BusConfig::default(), Arc::new(PrometheusRecorder))?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HUB_SERVICE_NAME` | `sensor-hub` | Service name in the startup log |
//! | `HUB_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `HUB_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `HUB_JSON_LOGS` | `false` | JSON lines instead of pretty output |

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, PrometheusRecorder, ACTIVE_SUBSCRIPTIONS,
    DELIVERY_ERRORS, EVENTS_DELIVERED, EVENTS_DROPPED, EVENTS_PUBLISHED, REGISTRY,
    SUBSCRIPTIONS_CLOSED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Registers metrics and installs the global logger.
///
/// Returns a guard to hold for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first so nothing logged during setup is missed
    let metrics = register_metrics()?;
    logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

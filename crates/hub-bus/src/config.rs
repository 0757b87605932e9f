//! Bus configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigurationError;

/// Maximum number of undelivered events buffered per subscription.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Upper bound on events handed to a consumer in one delivery pass.
pub const DEFAULT_MAX_DELIVERY_BATCH: usize = 64;

/// Events older than this at delivery time are reported as slow.
pub const DEFAULT_SLOW_DELIVERY_THRESHOLD_MS: u64 = 100;

/// Tunables for an [`EventBus`](crate::EventBus).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscription buffer capacity.
    pub subscription_buffer_capacity: usize,
    /// Events drained per delivery pass before yielding the worker.
    pub max_delivery_batch: usize,
    /// Warn when an event is delivered later than this after its timestamp.
    pub slow_delivery_threshold_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscription_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_delivery_batch: DEFAULT_MAX_DELIVERY_BATCH,
            slow_delivery_threshold_ms: DEFAULT_SLOW_DELIVERY_THRESHOLD_MS,
        }
    }
}

impl BusConfig {
    /// Override the per-subscription buffer capacity.
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.subscription_buffer_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.subscription_buffer_capacity == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "subscription_buffer_capacity",
                reason: "must be at least 1",
            });
        }
        if self.max_delivery_batch == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "max_delivery_batch",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn slow_delivery_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_delivery_threshold_ms)
    }
}

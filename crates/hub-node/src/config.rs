//! # Node Configuration
//!
//! Runtime parameters for the hub process, read from the environment.
//! Unset variables keep their defaults; malformed ones are rejected.

use std::env;
use std::time::Duration;

use hub_bus::BusConfig;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Event bus settings.
    pub bus: BusConfig,
    /// Publisher group shared by all simulated sensors.
    pub group_id: String,
    /// Number of simulated sensors.
    pub sensor_count: usize,
    /// Delay between two samples of one sensor.
    pub sample_interval: Duration,
    /// Period of the bus statistics log line.
    pub stats_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            group_id: "urn:hub:station".to_string(),
            sensor_count: 3,
            sample_interval: Duration::from_millis(250),
            stats_interval: Duration::from_secs(10),
        }
    }
}

impl NodeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HUB_BUFFER_CAPACITY`: Per-subscription buffer (default: 1024)
    /// - `HUB_GROUP_ID`: Sensor group id (default: urn:hub:station)
    /// - `HUB_SENSOR_COUNT`: Simulated sensors (default: 3)
    /// - `HUB_SAMPLE_INTERVAL_MS`: Sampling period (default: 250)
    /// - `HUB_STATS_INTERVAL_SECS`: Statistics period (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("HUB_BUFFER_CAPACITY") {
            config.bus.subscription_buffer_capacity =
                parse_positive("HUB_BUFFER_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("HUB_GROUP_ID") {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    var: "HUB_GROUP_ID",
                    value,
                    expected: "a non-empty id",
                });
            }
            config.group_id = value;
        }
        if let Some(value) = lookup("HUB_SENSOR_COUNT") {
            config.sensor_count = parse_positive("HUB_SENSOR_COUNT", &value)?;
        }
        if let Some(value) = lookup("HUB_SAMPLE_INTERVAL_MS") {
            config.sample_interval =
                Duration::from_millis(parse_positive("HUB_SAMPLE_INTERVAL_MS", &value)? as u64);
        }
        if let Some(value) = lookup("HUB_STATS_INTERVAL_SECS") {
            config.stats_interval =
                Duration::from_secs(parse_positive("HUB_STATS_INTERVAL_SECS", &value)? as u64);
        }

        Ok(config)
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            expected: "a positive integer",
        }),
    }
}

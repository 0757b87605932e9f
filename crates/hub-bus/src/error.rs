//! Error types for the event bus.
//!
//! Failures are split by who can act on them: configuration errors are
//! caller mistakes reported synchronously, lifecycle errors mean the bus
//! is no longer usable, and delivery errors describe a consumer fault and
//! only ever reach that consumer's `on_error` handler.

use thiserror::Error;

/// Invalid arguments or builder state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A subscription was submitted without any topic id.
    #[error("subscription has no topic ids")]
    NoTopics,

    /// A typed builder was asked for an event type it can never deliver.
    #[error("event type {requested} is incompatible with subscription type {base}")]
    IncompatibleEventType {
        requested: &'static str,
        base: &'static str,
    },

    /// The source id is already registered under a different group.
    #[error("source {source_id} already belongs to {existing}, cannot register it in {requested}")]
    GroupConflict {
        source_id: String,
        existing: String,
        requested: String,
    },

    /// Source and group ids must be non-empty.
    #[error("event source id must not be empty")]
    EmptySourceId,

    /// A bus setting is out of range.
    #[error("invalid bus setting {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors returned by bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The bus has been shut down.
    #[error("event bus is shut down, cannot {operation}")]
    Lifecycle { operation: &'static str },

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the event bus")]
    NoRuntime,
}

impl BusError {
    pub(crate) fn lifecycle(operation: &'static str) -> Self {
        Self::Lifecycle { operation }
    }
}

/// A fault raised while delivering to one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The consumer panicked inside a delivery callback.
    #[error("consumer panicked handling event from {source_id}: {message}")]
    ConsumerPanicked { source_id: String, message: String },

    /// The subscription filter panicked while evaluating an event.
    #[error("subscription filter panicked on event from {source_id}: {message}")]
    FilterPanicked { source_id: String, message: String },
}

/// Extracts a printable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

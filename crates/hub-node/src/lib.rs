//! # Hub Node
//!
//! A runnable sensor hub: simulated sensors publish temperature samples as
//! members of one publisher group, an ingest consumer subscribes to the
//! group alias and checks per-sensor ordering, and a status log follows
//! component lifecycle events on every source.
//!
//! ```text
//!   sensor:0 ──┐
//!   sensor:1 ──┼──► Group(urn:hub:station) ──► ingest consumer
//!   sensor:2 ──┘
//!   <uid>/main ─────────────────────────────► status log ("*")
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod ingest;
pub mod runtime;
pub mod sensors;

pub use config::{ConfigError, NodeConfig};
pub use ingest::{IngestSnapshot, IngestStats};
pub use runtime::{HubNode, NodeError};
pub use sensors::SimulatedSensor;

//! # Sensor Hub Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # Shared fixtures: events, recorders, waiting
//! └── integration/      # Bus contract under real concurrency
//!     ├── routing.rs
//!     ├── flow_control.rs
//!     ├── groups.rs
//!     ├── isolation.rs
//!     └── lifecycle.rs
//!
//! benches/bus_benchmarks.rs  # Publish and fan-out throughput
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p hub-tests
//! cargo test -p hub-tests integration::groups::
//! cargo bench -p hub-tests
//! ```

pub mod support;

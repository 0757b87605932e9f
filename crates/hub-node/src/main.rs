//! # Sensor Hub Node
//!
//! Entry point: telemetry, configuration, node start, Ctrl+C, shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use hub_node::{HubNode, NodeConfig};
use hub_telemetry::{encode_metrics, init_telemetry, PrometheusRecorder, TelemetryConfig};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    let config = NodeConfig::from_env().context("Invalid node configuration")?;
    let node = HubNode::new(config, Arc::new(PrometheusRecorder))
        .context("Failed to create hub node")?;
    node.start().await.context("Failed to start hub node")?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    node.shutdown().await;

    let metrics = encode_metrics().context("Failed to encode metrics")?;
    debug!(metrics = %metrics, "Final metrics");
    Ok(())
}

//! The hub node runtime.
//!
//! ## Startup Sequence
//!
//! 1. Create the event bus (subscriptions made now stay pending)
//! 2. Subscribe the ingest consumer and the status log
//! 3. Start the bus on the current runtime
//! 4. Spawn simulated sensors and the statistics task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hub_bus::{BusError, DataEvent, EventBus, MetricsRecorder, StatusEvent, Subscription};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::ingest::{self, IngestSnapshot, IngestStats};
use crate::sensors::SimulatedSensor;

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("node already started")]
    AlreadyStarted,
}

/// The main node runtime orchestrating bus, sensors and consumers.
pub struct HubNode {
    config: NodeConfig,
    bus: EventBus,
    ingest: Arc<IngestStats>,
    started: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
}

impl HubNode {
    pub fn new(config: NodeConfig, recorder: Arc<dyn MetricsRecorder>) -> Result<Self, NodeError> {
        info!(group_id = %config.group_id, sensors = config.sensor_count, "Creating hub node");
        let bus = EventBus::with_recorder(config.bus.clone(), recorder)?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            bus,
            ingest: Arc::new(IngestStats::default()),
            started: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ingest(&self) -> IngestSnapshot {
        self.ingest.snapshot()
    }

    /// Start the node. Must be called from within a tokio runtime.
    pub async fn start(&self) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }
        info!("===========================================");
        info!("  Sensor Hub Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let (on_next, on_error) = ingest::handlers(Arc::clone(&self.ingest));
        let ingest = self
            .bus
            .new_subscription_of::<DataEvent>()?
            .with_topic_id(&self.config.group_id)
            .subscribe_fn_with_error(on_next, on_error)?;
        let status = self
            .bus
            .new_subscription_of::<StatusEvent>()?
            .with_topic_id("*")
            .consume(|event| {
                info!(
                    component = %event.component_uid(),
                    status = ?event.status(),
                    "Component status changed"
                );
            })?;

        self.bus.start()?;
        let ingest = ingest.await?;
        let status = status.await?;
        self.subscriptions.lock().extend([ingest, status]);

        let mut tasks = Vec::with_capacity(self.config.sensor_count + 1);
        for index in 0..self.config.sensor_count {
            let sensor = SimulatedSensor::new(
                &self.bus,
                format!("urn:hub:sensor:{index}"),
                &self.config.group_id,
                self.config.sample_interval,
            )?;
            tasks.push(sensor.spawn(self.shutdown_tx.subscribe()));
        }
        tasks.push(self.spawn_stats());
        *self.tasks.lock() = tasks;

        info!(
            group_id = %self.config.group_id,
            sensors = self.config.sensor_count,
            buffer_capacity = self.config.bus.subscription_buffer_capacity,
            "Hub node running"
        );
        Ok(())
    }

    fn spawn_stats(&self) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let ingest = Arc::clone(&self.ingest);
        let period = self.config.stats_interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let metrics = bus.metrics();
                        let seen = ingest.snapshot();
                        info!(
                            published = metrics.events_published,
                            delivered = metrics.events_delivered,
                            dropped = metrics.events_dropped,
                            active_subscriptions = metrics.active_subscriptions(),
                            ingested_records = seen.records,
                            out_of_order = seen.out_of_order,
                            "Bus statistics"
                        );
                    }
                }
            }
        })
    }

    /// Shutdown the node gracefully.
    ///
    /// ## Shutdown Sequence
    ///
    /// 1. Signal sensors and the statistics task to stop
    /// 2. Wait for them (with timeout) so farewell statuses are published
    /// 3. Shut the bus down, completing every subscription
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if self.shutdown_tx.send(true).is_err() {
            warn!("No task was listening for shutdown");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match tokio::time::timeout(TASK_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Node task failed"),
                Err(_) => warn!("Node task did not stop in time"),
            }
        }

        self.bus.shutdown();
        self.subscriptions.lock().clear();

        let seen = self.ingest.snapshot();
        info!(
            ingested_records = seen.records,
            out_of_order = seen.out_of_order,
            "Shutdown complete"
        );
    }
}

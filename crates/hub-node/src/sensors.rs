//! Simulated sensors.
//!
//! Each sensor owns two sources: `<uid>/main` for lifecycle status and
//! `<uid>/outputs/temperature` for samples. Sample outputs of all sensors
//! share one publisher group so consumers see a single interleaved order.

use std::time::Duration;

use hub_bus::{
    BusError, ComponentStatus, DataEvent, EventBus, EventHeader, EventSourceInfo, Publisher,
    StatusEvent,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const TEMPERATURE_OUTPUT: &str = "temperature";

pub struct SimulatedSensor {
    uid: String,
    status: Publisher,
    samples: Publisher,
    interval: Duration,
    baseline: f64,
}

impl SimulatedSensor {
    /// Resolves the sensor's publishers on `bus`.
    pub fn new(
        bus: &EventBus,
        uid: impl Into<String>,
        group_id: &str,
        interval: Duration,
    ) -> Result<Self, BusError> {
        let uid = uid.into();
        let status = bus.publisher_for(&EventSourceInfo::main(&uid))?;
        let samples = bus.publisher_for(
            &EventSourceInfo::output(&uid, TEMPERATURE_OUTPUT).in_group(group_id),
        )?;
        Ok(Self {
            uid,
            status,
            samples,
            interval,
            baseline: 20.0,
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Spawns the sampling loop. It stops on the shutdown signal or once the
    /// bus refuses publishes.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.publish_status(ComponentStatus::Enabled) {
                warn!(uid = %self.uid, error = %e, "Sensor could not announce itself");
                return;
            }
            info!(uid = %self.uid, group_id = ?self.samples.group_id(), "Sensor started");

            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(self.interval);
            let mut seq: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let value = self.baseline + rng.gen_range(-0.5..0.5);
                        if let Err(e) = self.publish_sample(seq, value) {
                            debug!(uid = %self.uid, error = %e, "Sampling stopped");
                            return;
                        }
                        seq += 1;
                    }
                }
            }

            // The bus may already be down; a failed farewell is expected then
            let _ = self.publish_status(ComponentStatus::Disabled);
            info!(uid = %self.uid, samples = seq, "Sensor stopped");
        })
    }

    fn publish_status(&self, status: ComponentStatus) -> Result<(), BusError> {
        let header = EventHeader::new(self.status.source_id())?;
        self.status
            .publish(StatusEvent::new(header, self.uid.as_str(), status))
    }

    fn publish_sample(&self, seq: u64, value: f64) -> Result<(), BusError> {
        let header = EventHeader::new(self.samples.source_id())?;
        let record = json!({
            "sensor": self.uid,
            "seq": seq,
            "temperature": value,
        });
        self.samples
            .publish(DataEvent::new(header, TEMPERATURE_OUTPUT, vec![record]))
    }
}

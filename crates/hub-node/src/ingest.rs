//! Ingest consumer.
//!
//! Subscribes to the sensor group alias and keeps per-sensor counters,
//! flagging samples that arrive out of sequence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hub_bus::{DataEvent, DeliveryError};
use parking_lot::Mutex;
use tracing::{error, warn};

/// Point-in-time ingest counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSnapshot {
    pub events: u64,
    pub records: u64,
    pub out_of_order: u64,
    pub sensors: usize,
}

#[derive(Debug, Default)]
pub struct IngestStats {
    events: AtomicU64,
    records: AtomicU64,
    out_of_order: AtomicU64,
    last_seq: Mutex<HashMap<String, u64>>,
}

impl IngestStats {
    /// Accounts for one data event.
    pub fn record(&self, event: &DataEvent) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.records
            .fetch_add(event.records().len() as u64, Ordering::Relaxed);

        let mut last_seq = self.last_seq.lock();
        for record in event.records() {
            let (Some(sensor), Some(seq)) = (
                record.get("sensor").and_then(|v| v.as_str()),
                record.get("seq").and_then(|v| v.as_u64()),
            ) else {
                continue;
            };
            match last_seq.get_mut(sensor) {
                Some(last) if seq <= *last => {
                    self.out_of_order.fetch_add(1, Ordering::Relaxed);
                    warn!(sensor, seq, last = *last, "Sample out of sequence");
                }
                Some(last) => *last = seq,
                None => {
                    last_seq.insert(sensor.to_string(), seq);
                }
            }
        }
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            events: self.events.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            sensors: self.last_seq.lock().len(),
        }
    }
}

/// Callbacks for the ingest subscription.
pub fn handlers(
    stats: Arc<IngestStats>,
) -> (
    impl FnMut(Arc<DataEvent>) + Send + 'static,
    impl FnMut(DeliveryError) + Send + 'static,
) {
    let on_next = move |event: Arc<DataEvent>| stats.record(&event);
    let on_error = |e: DeliveryError| error!(error = %e, "Ingest subscription failed");
    (on_next, on_error)
}

//! Per-subscription delivery task.
//!
//! The task waits for buffered events and demand, then hands a batch to the
//! consumer on the blocking pool. The consumer box travels into the
//! blocking closure and back, so callbacks for one subscription never run
//! concurrently.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task;
use tracing::{debug, error, warn};

use crate::config::BusConfig;
use crate::error::{panic_message, DeliveryError};
use crate::event::{now_millis, Event, EventCast};
use crate::subscription::{Subscriber, Subscription, SubscriptionCore, SubscriptionState};

#[derive(Debug, Clone, Copy)]
pub(crate) struct DeliverySettings {
    max_batch: usize,
    slow_threshold_ms: i64,
}

impl DeliverySettings {
    pub(crate) fn from_config(config: &BusConfig) -> Self {
        Self {
            max_batch: config.max_delivery_batch.max(1),
            slow_threshold_ms: i64::try_from(config.slow_delivery_threshold_ms).unwrap_or(i64::MAX),
        }
    }
}

/// Runs `callback` against the consumer on the blocking pool. Returns the
/// consumer and the panic message if the callback panicked, or `None` if
/// the blocking task could not run.
async fn on_blocking_pool<E, F>(
    mut consumer: Box<dyn Subscriber<E>>,
    callback: F,
) -> Option<(Box<dyn Subscriber<E>>, Result<(), String>)>
where
    E: ?Sized + EventCast,
    F: FnOnce(&mut dyn Subscriber<E>) + Send + 'static,
{
    let joined = task::spawn_blocking(move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&mut *consumer)))
            .map_err(|payload| panic_message(&*payload));
        (consumer, outcome)
    })
    .await;
    match joined {
        Ok(result) => Some(result),
        Err(err) => {
            error!(error = %err, "Delivery callback task failed");
            None
        }
    }
}

pub(crate) async fn run<E>(
    core: Arc<SubscriptionCore>,
    consumer: Box<dyn Subscriber<E>>,
    settings: DeliverySettings,
) where
    E: ?Sized + EventCast,
{
    let handle = Subscription::new(Arc::clone(&core));
    let Some((mut consumer, outcome)) =
        on_blocking_pool(consumer, move |consumer| consumer.on_subscribe(handle)).await
    else {
        return;
    };
    if let Err(message) = outcome {
        core.fail(DeliveryError::ConsumerPanicked {
            source_id: core.topics().to_string(),
            message,
        });
    }

    loop {
        match core.state() {
            SubscriptionState::Completed => {
                finish(&core, consumer, |consumer| consumer.on_complete()).await;
                break;
            }
            SubscriptionState::Errored => {
                if let Some(fault) = core.take_fault() {
                    finish(&core, consumer, move |consumer| consumer.on_error(fault)).await;
                }
                break;
            }
            SubscriptionState::Cancelled => break,
            SubscriptionState::Building | SubscriptionState::Active => {}
        }

        let batch = core.take_ready(settings.max_batch);
        if batch.is_empty() {
            core.wait_for_work().await;
            continue;
        }

        let worker_core = Arc::clone(&core);
        let joined = task::spawn_blocking(move || {
            deliver_batch(&worker_core, &mut *consumer, batch, settings.slow_threshold_ms);
            consumer
        })
        .await;
        match joined {
            Ok(returned) => consumer = returned,
            Err(err) => {
                error!(subscription_id = %core.id(), error = %err, "Delivery worker failed");
                break;
            }
        }
    }

    core.clear_buffer();
    debug!(subscription_id = %core.id(), state = %core.state(), "Delivery task finished");
}

/// Runs a terminal callback. A panic there is logged and otherwise ignored.
async fn finish<E, F>(core: &SubscriptionCore, consumer: Box<dyn Subscriber<E>>, callback: F)
where
    E: ?Sized + EventCast,
    F: FnOnce(&mut dyn Subscriber<E>) + Send + 'static,
{
    if let Some((_, Err(message))) = on_blocking_pool(consumer, callback).await {
        error!(
            subscription_id = %core.id(),
            error = %message,
            "Consumer panicked in terminal callback"
        );
    }
}

fn deliver_batch<E>(
    core: &SubscriptionCore,
    consumer: &mut dyn Subscriber<E>,
    batch: Vec<Arc<dyn Event>>,
    slow_threshold_ms: i64,
) where
    E: ?Sized + EventCast,
{
    let mut delivered = 0_u64;
    for event in batch {
        // Stop as soon as the subscription is closed, even mid-batch.
        if !core.is_active() {
            break;
        }

        let delay_ms = now_millis().saturating_sub(event.timestamp());
        if delay_ms > slow_threshold_ms {
            warn!(
                subscription_id = %core.id(),
                source_id = %event.source_id(),
                dispatch_delay_ms = delay_ms,
                queue_size = core.buffered(),
                "Slow event dispatch"
            );
        }

        let source_id = event.header().shared_source_id();
        let Some(typed) = E::cast(event) else {
            continue;
        };
        match catch_unwind(AssertUnwindSafe(|| consumer.on_next(typed))) {
            Ok(()) => delivered += 1,
            Err(payload) => {
                core.fail(DeliveryError::ConsumerPanicked {
                    source_id: source_id.to_string(),
                    message: panic_message(&*payload),
                });
                break;
            }
        }
    }
    core.metrics().record_delivered(delivered);
}

//! Bus lifecycle: start, pending subscriptions, cancel and shutdown.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use hub_bus::{BusError, BusState, EventBus, SubscriptionState};

    use crate::support::{running_bus, wait_until, Received, SeqEvent};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_completes_and_refuses_work() {
        let bus = running_bus();
        let publisher = bus.get_publisher("urn:closing").unwrap();
        let completed = Arc::new(AtomicBool::new(false));
        let completed_flag = Arc::clone(&completed);

        let subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:closing")
            .subscribe_fn_with_handlers(
                |_: Arc<SeqEvent>| {},
                |_| {},
                move || completed_flag.store(true, Ordering::SeqCst),
            )
            .unwrap()
            .await
            .unwrap();
        assert_eq!(subscription.state(), SubscriptionState::Active);

        bus.shutdown();
        assert_eq!(bus.state(), BusState::ShutDown);
        assert_eq!(subscription.state(), SubscriptionState::Completed);
        wait_until(|| completed.load(Ordering::SeqCst)).await;

        assert!(matches!(
            publisher.publish(SeqEvent::new("urn:closing", 0)),
            Err(BusError::Lifecycle { .. })
        ));
        assert!(matches!(
            bus.get_publisher("urn:closing"),
            Err(BusError::Lifecycle { .. })
        ));
        assert!(matches!(
            bus.get_group_publisher("urn:g", "urn:closing:m"),
            Err(BusError::Lifecycle { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_group_subscription_made_before_start() {
        let bus = EventBus::default();
        let member = bus.get_group_publisher("urn:early", "urn:early:a").unwrap();
        let received = Received::default();
        let sink = received.clone();
        let pending = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:early")
            .consume(move |event: &SeqEvent| sink.push(event.seq))
            .unwrap();

        bus.start().unwrap();
        let subscription = pending.await.unwrap();
        assert!(subscription.is_active());
        for seq in 0..5 {
            member.publish(SeqEvent::new("urn:early:a", seq)).unwrap();
        }
        wait_until(|| received.len() == 5).await;
        assert_eq!(received.items(), (0..5).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_stops_delivery() {
        let bus = running_bus();
        let publisher = bus.get_publisher("urn:cancel").unwrap();
        let received = Received::default();
        let sink = received.clone();
        let subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:cancel")
            .consume(move |event: &SeqEvent| sink.push(event.seq))
            .unwrap()
            .await
            .unwrap();

        publisher.publish(SeqEvent::new("urn:cancel", 0)).unwrap();
        wait_until(|| received.len() == 1).await;
        subscription.cancel();
        subscription.cancel();
        assert_eq!(subscription.state(), SubscriptionState::Cancelled);
        assert_eq!(bus.number_of_subscribers("urn:cancel").unwrap(), 0);

        publisher.publish(SeqEvent::new("urn:cancel", 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.items(), vec![0]);
        assert_eq!(bus.metrics().active_subscriptions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_publisher_joins_existing_subscription() {
        let bus = running_bus();
        let received = Received::default();
        let sink = received.clone();
        let _subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_ids(["urn:late:*", "urn:late-group"])
            .consume(move |event: &SeqEvent| sink.push(event.seq))
            .unwrap()
            .await
            .unwrap();

        let direct = bus.get_publisher("urn:late:1").unwrap();
        let member = bus
            .get_group_publisher("urn:late-group", "urn:other:1")
            .unwrap();
        assert_eq!(direct.number_of_subscribers(), 1);
        assert_eq!(member.number_of_subscribers(), 1);

        direct.publish(SeqEvent::new("urn:late:1", 0)).unwrap();
        wait_until(|| received.len() == 1).await;
        member.publish(SeqEvent::new("urn:other:1", 1)).unwrap();
        wait_until(|| received.len() == 2).await;
        assert_eq!(received.items(), vec![0, 1]);
    }
}

//! Demand-based flow control and overflow handling.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use hub_bus::{BusConfig, DropAction, Event, EventBus, Subscription};

    use crate::support::{running_bus, wait_until, ManualSubscriber, Received, SeqEvent};

    fn seqs(received: &Received<Arc<SeqEvent>>) -> Vec<usize> {
        received.items().iter().map(|event| event.seq).collect()
    }

    fn small_bus(capacity: usize) -> EventBus {
        let bus = EventBus::new(BusConfig::default().with_buffer_capacity(capacity)).unwrap();
        bus.start().unwrap();
        bus
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_demand_limits_delivery() {
        let bus = running_bus();
        let publisher = bus.get_publisher("urn:demand").unwrap();
        let (subscriber, handle, received) = ManualSubscriber::<SeqEvent>::new(10);
        let subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:demand")
            .subscribe(subscriber)
            .unwrap()
            .await
            .unwrap();
        wait_until(|| handle.lock().is_some()).await;

        for seq in 0..15 {
            publisher.publish(SeqEvent::new("urn:demand", seq)).unwrap();
        }
        wait_until(|| received.len() == 10).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.len(), 10);
        assert_eq!(subscription.demand(), 0);
        assert_eq!(subscription.buffered(), 5);

        subscription.request(5);
        wait_until(|| received.len() == 15).await;
        assert_eq!(seqs(&received), (0..15).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_buffer_discards_newest() {
        let bus = small_bus(4);
        let publisher = bus.get_publisher("urn:overflow").unwrap();
        let (subscriber, _handle, received) = ManualSubscriber::<SeqEvent>::new(0);
        let subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:overflow")
            .subscribe(subscriber)
            .unwrap()
            .await
            .unwrap();

        let dropped = Arc::new(AtomicUsize::new(0));
        for seq in 0..10 {
            let dropped = Arc::clone(&dropped);
            publisher
                .publish_with(
                    SeqEvent::new("urn:overflow", seq),
                    move |_: &Subscription, _: &Arc<dyn Event>| {
                        dropped.fetch_add(1, Ordering::SeqCst);
                        DropAction::Discard
                    },
                )
                .unwrap();
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 6);
        assert_eq!(subscription.buffered(), 4);
        assert_eq!(bus.metrics().events_dropped, 6);

        subscription.request(10);
        wait_until(|| received.len() == 4).await;
        assert_eq!(seqs(&received), vec![0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_buffer_replaces_oldest() {
        let bus = small_bus(3);
        let publisher = bus.get_publisher("urn:latest").unwrap();
        let (subscriber, _handle, received) = ManualSubscriber::<SeqEvent>::new(0);
        let subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:latest")
            .subscribe(subscriber)
            .unwrap()
            .await
            .unwrap();

        for seq in 0..8 {
            publisher
                .publish_with(
                    SeqEvent::new("urn:latest", seq),
                    |_: &Subscription, _: &Arc<dyn Event>| DropAction::ReplaceOldest,
                )
                .unwrap();
        }
        subscription.request(3);
        wait_until(|| received.len() == 3).await;
        assert_eq!(seqs(&received), vec![5, 6, 7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_consumer_never_blocks_publisher() {
        let bus = small_bus(8);
        let publisher = bus.get_publisher("urn:slow").unwrap();
        let fast = Received::default();
        let fast_sink = fast.clone();

        let _slow = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:slow")
            .consume(|_: &SeqEvent| std::thread::sleep(Duration::from_millis(20)))
            .unwrap()
            .await
            .unwrap();
        let fast_subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:slow")
            .consume(move |event: &SeqEvent| fast_sink.push(event.seq))
            .unwrap()
            .await
            .unwrap();

        let started = Instant::now();
        for seq in 0..100 {
            publisher.publish(SeqEvent::new("urn:slow", seq)).unwrap();
            tokio::task::yield_now().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        // The fast subscription may drop too, but what it sees stays ordered
        wait_until(|| !fast.is_empty() && fast_subscription.buffered() == 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = fast.items();
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(bus.metrics().events_dropped > 0);
    }
}

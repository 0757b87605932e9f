//! Publisher group ordering under concurrent producers.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use hub_bus::{
        BusConfig, BusError, ConfigurationError, DropAction, Event, EventBus, Subscription,
    };
    use parking_lot::Mutex;
    use rand::Rng;

    use crate::support::{running_bus, wait_until, ManualSubscriber, Received, SeqEvent};

    /// Per-member subsequence of a merged stream.
    fn member_order(merged: &[(String, usize)], member: &str) -> Vec<usize> {
        merged
            .iter()
            .filter(|(source, _)| source == member)
            .map(|(_, seq)| *seq)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_group_merge_matches_publish_order() {
        let bus = running_bus();
        let a = bus.get_group_publisher("urn:net", "urn:net:a").unwrap();
        let b = bus.get_group_publisher("urn:net", "urn:net:b").unwrap();

        let received = Received::default();
        let sink = received.clone();
        let _subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_ids(["urn:net:a", "urn:net:b"])
            .consume(move |event: &SeqEvent| {
                sink.push((event.source_id().to_string(), event.seq));
            })
            .unwrap()
            .await
            .unwrap();

        // Each producer appends to the log while the publish call is still
        // serialized with the other producer, so the log is the true order.
        let publish_log = Arc::new(Mutex::new(Vec::new()));
        let spawn_member = |publisher: hub_bus::Publisher, count: usize| {
            let log = Arc::clone(&publish_log);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for seq in 0..count {
                    {
                        let mut log = log.lock();
                        publisher
                            .publish(SeqEvent::new(publisher.source_id(), seq))
                            .unwrap();
                        log.push((publisher.source_id().to_string(), seq));
                    }
                    if rng.gen_bool(0.3) {
                        std::thread::yield_now();
                    }
                }
            })
        };
        let producers = [spawn_member(a, 35), spawn_member(b, 31)];
        for producer in producers {
            producer.join().unwrap();
        }

        wait_until(|| received.len() == 66).await;
        let merged = received.items();
        assert_eq!(member_order(&merged, "urn:net:a"), (0..35).collect::<Vec<_>>());
        assert_eq!(member_order(&merged, "urn:net:b"), (0..31).collect::<Vec<_>>());
        assert_eq!(merged, *publish_log.lock());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribers_agree_on_group_order() {
        let bus = running_bus();
        let members: Vec<_> = (0..3)
            .map(|i| {
                bus.get_group_publisher("urn:station", &format!("urn:station:{i}"))
                    .unwrap()
            })
            .collect();

        let via_alias = Received::default();
        let alias_sink = via_alias.clone();
        let _alias = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:station")
            .consume(move |event: &SeqEvent| {
                alias_sink.push((event.source_id().to_string(), event.seq))
            })
            .unwrap()
            .await
            .unwrap();
        let via_prefix = Received::default();
        let prefix_sink = via_prefix.clone();
        let _prefix = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:station:*")
            .consume(move |event: &SeqEvent| {
                prefix_sink.push((event.source_id().to_string(), event.seq))
            })
            .unwrap()
            .await
            .unwrap();

        let handles: Vec<_> = members
            .into_iter()
            .map(|publisher| {
                std::thread::spawn(move || {
                    for seq in 0..56 {
                        publisher
                            .publish(SeqEvent::new(publisher.source_id(), seq))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        wait_until(|| via_alias.len() == 168 && via_prefix.len() == 168).await;
        assert_eq!(via_alias.items(), via_prefix.items());
        for i in 0..3 {
            assert_eq!(
                member_order(&via_alias.items(), &format!("urn:station:{i}")),
                (0..56).collect::<Vec<_>>()
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_group_overflow_replaces_oldest_in_group_order() {
        let bus = EventBus::new(BusConfig::default().with_buffer_capacity(4)).unwrap();
        bus.start().unwrap();
        let a = bus.get_group_publisher("urn:duo", "urn:duo:a").unwrap();
        let b = bus.get_group_publisher("urn:duo", "urn:duo:b").unwrap();
        let (subscriber, _handle, received) = ManualSubscriber::<SeqEvent>::new(0);
        let subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_ids(["urn:duo:a", "urn:duo:b"])
            .subscribe(subscriber)
            .unwrap()
            .await
            .unwrap();

        let replaced = Arc::new(AtomicUsize::new(0));
        for seq in 0..10 {
            let publisher = if seq % 2 == 0 { &a } else { &b };
            let replaced = Arc::clone(&replaced);
            publisher
                .publish_with(
                    SeqEvent::new(publisher.source_id(), seq),
                    move |_: &Subscription, _: &Arc<dyn Event>| {
                        replaced.fetch_add(1, Ordering::SeqCst);
                        DropAction::ReplaceOldest
                    },
                )
                .unwrap();
        }

        // The drop handler runs on the group dispatcher, after publish returns
        wait_until(|| replaced.load(Ordering::SeqCst) == 6).await;
        assert_eq!(subscription.buffered(), 4);
        assert_eq!(received.len(), 0);

        subscription.request(10);
        wait_until(|| received.len() == 4).await;
        let merged: Vec<_> = received
            .items()
            .iter()
            .map(|event| (event.source_id().to_string(), event.seq))
            .collect();
        assert_eq!(
            merged,
            vec![
                ("urn:duo:a".to_string(), 6),
                ("urn:duo:b".to_string(), 7),
                ("urn:duo:a".to_string(), 8),
                ("urn:duo:b".to_string(), 9),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_member_subscription_sees_only_its_member() {
        let bus = running_bus();
        let a = bus.get_group_publisher("urn:pair", "urn:pair:a").unwrap();
        let b = bus.get_group_publisher("urn:pair", "urn:pair:b").unwrap();
        let received = Received::default();
        let sink = received.clone();
        let _subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:pair:b")
            .consume(move |event: &SeqEvent| sink.push(event.source_id().to_string()))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(a.number_of_subscribers(), 0);
        assert_eq!(b.number_of_subscribers(), 1);
        for seq in 0..5 {
            a.publish(SeqEvent::new("urn:pair:a", seq)).unwrap();
            b.publish(SeqEvent::new("urn:pair:b", seq)).unwrap();
        }
        wait_until(|| received.len() == 5).await;
        assert!(received.items().iter().all(|source| source == "urn:pair:b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_member_cannot_switch_groups() {
        let bus = running_bus();
        bus.get_group_publisher("urn:one", "urn:shared").unwrap();
        let err = bus.get_group_publisher("urn:two", "urn:shared").unwrap_err();
        assert!(matches!(
            err,
            BusError::Configuration(ConfigurationError::GroupConflict { .. })
        ));
        assert_eq!(
            bus.group_members("urn:one").unwrap(),
            Some(vec!["urn:shared".to_string()])
        );
        assert_eq!(bus.group_members("urn:two").unwrap(), None);
    }
}

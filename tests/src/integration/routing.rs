//! Topic routing, type selection and filters.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use hub_bus::{BusError, ConfigurationError, DataEvent, Event, EventHeader};
    use tokio_stream::StreamExt;

    use crate::support::{running_bus, wait_until, Received, SeqEvent, TextEvent, WAIT_TIMEOUT};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_filter_selects_single_event() {
        let bus = running_bus();
        let publisher = bus.get_publisher("urn:sensor:filter").unwrap();
        let received = Received::default();
        let sink = received.clone();

        let _subscription = bus
            .new_subscription_of::<TextEvent>()
            .unwrap()
            .with_topic_id("urn:sensor:filter")
            .with_filter(|event: &TextEvent| event.text == "test2")
            .consume(move |event: &TextEvent| sink.push(event.text.clone()))
            .unwrap()
            .await
            .unwrap();

        for i in 0..10 {
            publisher
                .publish(TextEvent::new("urn:sensor:filter", format!("test{i}")))
                .unwrap();
        }
        wait_until(|| received.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.items(), vec!["test2".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_prefix_pattern_spans_sources() {
        let bus = running_bus();
        let received = Received::default();
        let sink = received.clone();
        let _subscription = bus
            .new_subscription()
            .unwrap()
            .with_topic_id("urn:weather:*")
            .consume(move |event: &dyn Event| sink.push(event.source_id().to_string()))
            .unwrap()
            .await
            .unwrap();

        for source in ["urn:weather:1", "urn:weather:", "urn:weather", "urn:weatherx"] {
            bus.get_publisher(source)
                .unwrap()
                .publish(TextEvent::new(source, "x"))
                .unwrap();
        }
        wait_until(|| received.len() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            received.items(),
            vec!["urn:weather:1".to_string(), "urn:weather:".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_type_selection_skips_other_events() {
        let bus = running_bus();
        let publisher = bus.get_publisher("urn:mixed").unwrap();
        let received = Received::default();
        let sink = received.clone();
        let _subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:mixed")
            .consume(move |event: &SeqEvent| sink.push(event.seq))
            .unwrap()
            .await
            .unwrap();

        publisher.publish(TextEvent::new("urn:mixed", "ignored")).unwrap();
        publisher.publish(SeqEvent::new("urn:mixed", 7)).unwrap();
        publisher
            .publish(DataEvent::new(
                EventHeader::new("urn:mixed").unwrap(),
                "obs",
                Vec::new(),
            ))
            .unwrap();

        wait_until(|| received.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.items(), vec![7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_publisher_for_same_source() {
        let bus = running_bus();
        let first = bus.get_publisher("urn:same").unwrap();
        let second = bus.get_publisher("urn:same").unwrap();
        let received = Received::default();
        let sink = received.clone();
        let _subscription = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:same")
            .consume(move |event: &SeqEvent| sink.push(event.seq))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(first.number_of_subscribers(), 1);
        assert_eq!(second.number_of_subscribers(), 1);
        first.publish(SeqEvent::new("urn:same", 0)).unwrap();
        second.publish(SeqEvent::new("urn:same", 1)).unwrap();
        wait_until(|| received.len() == 2).await;
        assert_eq!(received.items(), vec![0, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_empty_topics_rejected_before_activation() {
        let bus = running_bus();
        let result = bus.new_subscription().unwrap().consume(|_| {});
        assert!(matches!(
            result,
            Err(BusError::Configuration(ConfigurationError::NoTopics))
        ));
        assert_eq!(bus.metrics().subscriptions_activated, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_incompatible_event_type_rejected() {
        let bus = running_bus();
        let result = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:x")
            .with_event_type::<TextEvent>()
            .consume(|_| {});
        assert!(matches!(
            result,
            Err(BusError::Configuration(
                ConfigurationError::IncompatibleEventType { .. }
            ))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stream_consumption() {
        let bus = running_bus();
        let publisher = bus.get_publisher("urn:stream").unwrap();
        let mut stream = bus
            .new_subscription_of::<SeqEvent>()
            .unwrap()
            .with_topic_id("urn:stream")
            .into_stream(4)
            .await
            .unwrap();

        for seq in 0..20 {
            publisher.publish(SeqEvent::new("urn:stream", seq)).unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 20 {
            let event: Arc<SeqEvent> = tokio::time::timeout(WAIT_TIMEOUT, stream.next())
                .await
                .unwrap()
                .unwrap();
            seen.push(event.seq);
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());

        let subscription = stream.subscription().clone();
        drop(stream);
        assert!(!subscription.is_active());
        assert_eq!(publisher.number_of_subscribers(), 0);
    }
}

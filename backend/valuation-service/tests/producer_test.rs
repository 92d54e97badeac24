//! Producer behavior against the in-memory broker

use async_trait::async_trait;
use event_schema::{ListingEvent, ListingPayload};
use resilience::RetryConfig;
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use valuation_service::producer::read_replay_file;
use valuation_service::{
    BrokerError, Delivery, EventPublisher, ListingGenerator, ListingProducer, MemoryBroker,
    PublishFailure, PublishStats,
};

const TOPIC: &str = "listing.events";

/// Counts sends before handing them to the broker
struct CountingPublisher {
    broker: Arc<MemoryBroker>,
    sends: AtomicU32,
}

impl CountingPublisher {
    fn new(broker: Arc<MemoryBroker>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            sends: AtomicU32::new(0),
        })
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for CountingPublisher {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<Delivery, BrokerError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.broker.send(topic, key, payload).await
    }
}

fn retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_secs(1),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn listing(district: &str) -> ListingPayload {
    ListingPayload {
        district: Some(district.to_string()),
        property_type: Some("apartment".to_string()),
        area_sqm: Some(75.0),
        rooms: Some(3),
        construction_year: Some(2005),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_below_ceiling_are_absorbed() {
    let broker = MemoryBroker::new(3);
    let publisher = CountingPublisher::new(broker.clone());
    let producer = ListingProducer::new(publisher.clone(), TOPIC, retry(5));

    broker.fail_next_sends(3);
    let event_id = producer.publish(listing("Downtown")).await.unwrap();

    assert_eq!(publisher.sends(), 4);
    let messages = broker.messages(TOPIC);
    assert_eq!(messages.len(), 1);
    assert_eq!(event_schema::decode(&messages[0].payload).unwrap().event_id, event_id);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_broker_reports_failure_at_ceiling() {
    let broker = MemoryBroker::new(1);
    let publisher = CountingPublisher::new(broker.clone());
    let producer = ListingProducer::new(publisher.clone(), TOPIC, retry(3));

    broker.fail_next_sends(u32::MAX);
    let err = producer.publish(listing("Downtown")).await.unwrap_err();

    match &err {
        PublishFailure::Exhausted {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(last_error, BrokerError::Unavailable(_)));
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
    assert_eq!(publisher.sends(), 3);
    assert!(broker.messages(TOPIC).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_send_is_not_retried() {
    let broker = MemoryBroker::new(1);
    let publisher = CountingPublisher::new(broker.clone());
    let producer = ListingProducer::new(publisher.clone(), TOPIC, retry(5));

    broker.reject_sends(true);
    let err = producer.publish(listing("Downtown")).await.unwrap_err();

    assert!(matches!(err, PublishFailure::Rejected { .. }));
    assert_eq!(err.attempts(), 1);
    assert_eq!(publisher.sends(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_between_attempts() {
    let broker = MemoryBroker::new(1);
    let producer = ListingProducer::new(broker.clone(), TOPIC, retry(4));

    broker.fail_next_sends(3);
    let started = tokio::time::Instant::now();
    producer.publish(listing("Downtown")).await.unwrap();

    // 50ms + 100ms + 200ms with jitter disabled
    assert_eq!(started.elapsed(), Duration::from_millis(350));
}

#[tokio::test(start_paused = true)]
async fn test_segment_events_share_a_partition_in_order() {
    let broker = MemoryBroker::new(8);
    let producer = ListingProducer::new(broker.clone(), TOPIC, retry(3));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(producer.publish(listing("Oldtown")).await.unwrap());
    }
    producer.publish(listing("Harbor")).await.unwrap();

    let oldtown: Vec<_> = broker
        .messages(TOPIC)
        .into_iter()
        .map(|m| (m.partition, event_schema::decode(&m.payload).unwrap()))
        .filter(|(_, e)| e.payload.district.as_deref() == Some("Oldtown"))
        .collect();

    let partitions: HashSet<_> = oldtown.iter().map(|(p, _)| *p).collect();
    assert_eq!(partitions.len(), 1);
    assert_eq!(
        oldtown.iter().map(|(_, e)| e.event_id.clone()).collect::<Vec<_>>(),
        ids
    );
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_listings_are_reproducible() {
    let first = MemoryBroker::new(2);
    let second = MemoryBroker::new(2);

    for broker in [&first, &second] {
        let producer = ListingProducer::new(broker.clone(), TOPIC, retry(3));
        let events = ListingGenerator::new(7).take(10).map(ListingEvent::new);
        let stats = producer.publish_all(events, Duration::ZERO).await;
        assert_eq!(stats, PublishStats { published: 10, failed: 0 });
    }

    let payloads = |broker: &Arc<MemoryBroker>| -> Vec<ListingPayload> {
        broker
            .messages(TOPIC)
            .iter()
            .map(|m| event_schema::decode(&m.payload).unwrap().payload)
            .collect()
    };
    assert_eq!(payloads(&first), payloads(&second));
}

#[tokio::test]
async fn test_replay_file_is_published_with_fresh_ids() {
    let original = ListingEvent::new(listing("Riverside"));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# exported listings").unwrap();
    writeln!(file, "{}", String::from_utf8(event_schema::encode(&original).unwrap()).unwrap())
        .unwrap();
    writeln!(file).unwrap();
    writeln!(
        file,
        r#"{{"district": "Harbor", "propertyType": "house", "areaSqm": 140.0, "rooms": 4, "constructionYear": 1987}}"#
    )
    .unwrap();
    file.flush().unwrap();

    let events = read_replay_file(file.path()).await.unwrap();
    assert_eq!(events.len(), 2);

    let broker = MemoryBroker::new(2);
    let producer = ListingProducer::new(broker.clone(), TOPIC, retry(3));
    let stats = producer.publish_all(events, Duration::ZERO).await;
    assert_eq!(stats.published, 2);

    let published: Vec<_> = broker
        .messages(TOPIC)
        .iter()
        .map(|m| event_schema::decode(&m.payload).unwrap())
        .collect();

    let replayed = published
        .iter()
        .find(|e| e.payload.district.as_deref() == Some("Riverside"))
        .unwrap();
    assert_eq!(replayed.payload, original.payload);
    assert_ne!(replayed.event_id, original.event_id);

    let bare = published
        .iter()
        .find(|e| e.payload.district.as_deref() == Some("Harbor"))
        .unwrap();
    assert_eq!(bare.payload.area_sqm, Some(140.0));
}

#[tokio::test]
async fn test_non_finite_area_is_refused_before_sending() {
    let broker = MemoryBroker::new(1);
    let publisher = CountingPublisher::new(broker.clone());
    let producer = ListingProducer::new(publisher.clone(), TOPIC, retry(3));

    let payload = ListingPayload {
        area_sqm: Some(f64::NAN),
        ..listing("Downtown")
    };
    let err = producer.publish(payload).await.unwrap_err();

    assert!(matches!(err, PublishFailure::Encode { ref message, .. } if message.contains("areaSqm")));
    assert_eq!(publisher.sends(), 0);
    assert!(broker.messages(TOPIC).is_empty());
}

//! Consumer acknowledge contract
//!
//! ack on applied / skipped / invalid / undecodable, no-ack on store
//! unavailability and persistence failure, and zero writes whenever the
//! store is down.

use metric_aggregator::buggify::faults::store as faults;
use metric_aggregator::io::SimulatedRng;
use metric_aggregator::metrics::{
    AckDecision, Aggregator, ConsumerAdapter, ConsumerError, MetricEvent, MetricKind,
};
use metric_aggregator::store::{
    InMemoryMetricStore, MetricStore, SimulatedMetricStore, SimulatedStoreConfig,
};
use metric_aggregator::transport::codec;
use std::sync::Arc;

type Simulated = SimulatedMetricStore<InMemoryMetricStore>;

fn consumer(config: SimulatedStoreConfig) -> ConsumerAdapter<Simulated> {
    let store = SimulatedMetricStore::new(InMemoryMetricStore::new(), SimulatedRng::new(11), config);
    ConsumerAdapter::new(Arc::new(Aggregator::new(store)))
}

fn store(consumer: &ConsumerAdapter<Simulated>) -> &Simulated {
    consumer.aggregator().store()
}

#[test]
fn test_outage_then_redelivery_applies_once() {
    let consumer = consumer(SimulatedStoreConfig::no_faults());
    let event = MetricEvent::increment("library.errors.total");

    store(&consumer).set_available(false);
    for _ in 0..3 {
        let decision = consumer.handle(&event);
        assert!(matches!(
            decision,
            AckDecision::DoNotAcknowledge(ConsumerError::StoreUnavailable(_))
        ));
    }
    assert_eq!(store(&consumer).stats().writes_attempted, 0);
    assert_eq!(store(&consumer).inner().len(), 0);

    store(&consumer).set_available(true);
    assert!(consumer.handle(&event).is_ack());

    assert_eq!(
        store(&consumer).get("library.errors.total").unwrap().unwrap().value,
        1
    );
    let stats = consumer.stats();
    assert_eq!(stats.store_unavailable, 3);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.acknowledged(), 1);
}

#[test]
fn test_invalid_events_acknowledged_while_store_down() {
    let consumer = consumer(SimulatedStoreConfig::no_faults());
    store(&consumer).set_available(false);

    let mut no_name = MetricEvent::set("g", 1, MetricKind::Gauge);
    no_name.name.clear();
    let mut no_value = MetricEvent::set("g", 1, MetricKind::Gauge);
    no_value.value = None;

    assert!(consumer.handle(&no_name).is_ack());
    assert!(consumer.handle(&no_value).is_ack());
    assert_eq!(store(&consumer).stats().writes_attempted, 0);
    assert_eq!(consumer.stats().rejected, 2);
}

#[test]
fn test_write_failure_is_retryable() {
    let consumer = consumer(SimulatedStoreConfig::no_faults().with(faults::WRITE_FAIL, 1.0));
    let decision = consumer.handle(&MetricEvent::set("g", 5, MetricKind::Gauge));

    let AckDecision::DoNotAcknowledge(ConsumerError::Persistence(e)) = decision else {
        panic!("expected persistence failure, got {:?}", decision);
    };
    assert!(e.to_string().contains("simulated write failure"));
    assert!(store(&consumer).get("g").unwrap().is_none());
}

#[test]
fn test_lost_create_race_is_retried_and_acknowledged() {
    let consumer = consumer(SimulatedStoreConfig::no_faults().with(faults::PHANTOM_CREATE, 1.0));
    assert!(consumer.handle(&MetricEvent::increment("c")).is_ack());

    // phantom creator wrote 1, our retried increment made it 2
    assert_eq!(store(&consumer).get("c").unwrap().unwrap().value, 2);
    assert_eq!(consumer.stats().race_retries, 1);
    assert_eq!(consumer.aggregator().read_metric("c"), Some(2));
}

#[test]
fn test_zero_row_retry_exhaustion_is_not_acknowledged() {
    let consumer = consumer(
        SimulatedStoreConfig::no_faults()
            .with(faults::PHANTOM_CREATE, 1.0)
            .with(faults::ZERO_ROWS, 1.0),
    );

    let decision = consumer.handle(&MetricEvent::increment("c"));
    let AckDecision::DoNotAcknowledge(ConsumerError::Persistence(e)) = decision else {
        panic!("expected retry exhaustion, got {:?}", decision);
    };
    assert!(e.to_string().contains("retry exhausted"));
    assert_eq!(consumer.stats().failed, 1);
}

#[test]
fn test_payload_contract() {
    let consumer = consumer(SimulatedStoreConfig::no_faults());

    let set = codec::encode(&MetricEvent::set("library.cache.misses.total", 50, MetricKind::Gauge))
        .unwrap();
    assert!(consumer.handle_payload(&set).is_ack());
    assert!(consumer.handle_payload(b"\xff\xfe").is_ack());
    assert!(consumer.handle_payload(br#"{"metricName":"x","operation":"SET"}"#).is_ack());

    let stats = consumer.stats();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.undecodable, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(store(&consumer).count().unwrap(), 1);
}

//! Aggregator scenario tests
//!
//! End-to-end behaviour of validate -> apply -> store/cache through the
//! public API, against the in-memory store.

use metric_aggregator::metrics::{
    AckDecision, AggregateOutcome, Aggregator, ConsumerAdapter, IncrementStrategy, MetricEvent,
    MetricKind, Rejection, SkipReason,
};
use metric_aggregator::store::{InMemoryMetricStore, MetricStore};
use metric_aggregator::MetricRecord;
use std::sync::Arc;

fn aggregator() -> Aggregator<InMemoryMetricStore> {
    Aggregator::new(InMemoryMetricStore::new())
}

fn stored(aggregator: &Aggregator<InMemoryMetricStore>, name: &str) -> Option<MetricRecord> {
    aggregator.store().get(name).unwrap()
}

#[test]
fn test_sequential_increments_add_n() {
    for strategy in [
        IncrementStrategy::Atomic,
        IncrementStrategy::Optimistic { max_attempts: 3 },
    ] {
        let aggregator = Aggregator::with_strategy(InMemoryMetricStore::new(), strategy);
        assert!(aggregator
            .apply(&MetricEvent::set("library.loans.total", 40, MetricKind::Counter))
            .is_applied());

        for _ in 0..25 {
            assert!(aggregator
                .apply(&MetricEvent::increment("library.loans.total"))
                .is_applied());
        }

        let record = stored(&aggregator, "library.loans.total").unwrap();
        assert_eq!(record.value, 65, "strategy {:?}", strategy);
        assert_eq!(aggregator.read_metric("library.loans.total"), Some(65));
    }
}

#[test]
fn test_increment_value_is_advisory() {
    let aggregator = aggregator();
    let mut event = MetricEvent::increment("library.errors.total");
    event.value = Some(500);

    aggregator.apply(&event);
    aggregator.apply(&event);

    assert_eq!(stored(&aggregator, "library.errors.total").unwrap().value, 2);
}

#[test]
fn test_first_increment_creates_counter() {
    let aggregator = aggregator();
    let event = MetricEvent::increment("library.errors.total").with_description("errors");

    let AggregateOutcome::Applied(mutation) = aggregator.apply(&event) else {
        panic!("expected applied");
    };
    assert!(mutation.created);
    assert!(!mutation.race_retried);

    let record = stored(&aggregator, "library.errors.total").unwrap();
    assert_eq!(record.value, 1);
    assert_eq!(record.version, 0);
    assert_eq!(record.kind, MetricKind::Counter);
    assert_eq!(record.description.as_deref(), Some("errors"));
}

#[test]
fn test_set_creates_then_overwrites() {
    let aggregator = aggregator();
    let name = "library.cache.misses.total";

    let first = aggregator.apply(&MetricEvent::set(name, 50, MetricKind::Gauge));
    assert_eq!(first.value(), Some(50));
    assert_eq!(stored(&aggregator, name).unwrap().value, 50);

    let second = aggregator.apply(&MetricEvent::set(name, 10, MetricKind::Gauge));
    assert_eq!(second.value(), Some(10));

    let record = stored(&aggregator, name).unwrap();
    assert_eq!(record.value, 10);
    assert_eq!(record.kind, MetricKind::Gauge);
    assert_eq!(aggregator.read_metric(name), Some(10));
}

#[test]
fn test_replayed_set_is_idempotent_on_value() {
    let aggregator = aggregator();
    let event = MetricEvent::set("library.members.active", 7, MetricKind::Gauge);

    let mut versions = Vec::new();
    for _ in 0..4 {
        aggregator.apply(&event);
        let record = stored(&aggregator, "library.members.active").unwrap();
        assert_eq!(record.value, 7);
        versions.push(record.version);
    }
    assert_eq!(versions, vec![0, 1, 2, 3]);
}

#[test]
fn test_reset_missing_is_noop() {
    let aggregator = aggregator();
    let consumer = ConsumerAdapter::new(Arc::new(aggregator));

    let decision = consumer.handle(&MetricEvent::reset("nonexistent"));
    assert!(decision.is_ack());

    let aggregator = consumer.aggregator();
    assert!(stored(aggregator, "nonexistent").is_none());
    assert_eq!(aggregator.store().count().unwrap(), 0);
    assert_eq!(aggregator.read_metric("nonexistent"), None);
}

#[test]
fn test_reset_existing_keeps_record() {
    let aggregator = aggregator();
    for _ in 0..5 {
        aggregator.apply(&MetricEvent::increment("library.renewals.total"));
    }

    let outcome = aggregator.apply(&MetricEvent::reset("library.renewals.total"));
    assert_eq!(outcome.value(), Some(0));

    let record = stored(&aggregator, "library.renewals.total").unwrap();
    assert_eq!(record.value, 0);
    assert_eq!(record.version, 5);
    assert_eq!(aggregator.read_metric("library.renewals.total"), Some(0));

    aggregator.apply(&MetricEvent::increment("library.renewals.total"));
    assert_eq!(stored(&aggregator, "library.renewals.total").unwrap().value, 1);
}

#[test]
fn test_invalid_events_never_write() {
    let aggregator = Arc::new(aggregator());
    let consumer = ConsumerAdapter::new(aggregator.clone());

    let mut empty_name = MetricEvent::increment("x");
    empty_name.name = "  ".to_string();
    let mut empty_operation = MetricEvent::increment("x");
    empty_operation.operation = String::new();
    let mut null_value = MetricEvent::increment("x");
    null_value.value = None;

    for (event, rejection) in [
        (empty_name, Rejection::EmptyName),
        (empty_operation, Rejection::EmptyOperation),
        (null_value, Rejection::MissingValue),
    ] {
        assert!(matches!(
            aggregator.apply(&event),
            AggregateOutcome::Skipped(SkipReason::Invalid(r)) if r == rejection
        ));
        assert!(matches!(consumer.handle(&event), AckDecision::Acknowledge));
    }

    assert_eq!(aggregator.store().count().unwrap(), 0);
    assert_eq!(consumer.stats().rejected, 3);
}

#[test]
fn test_unknown_operation_acknowledged_without_write() {
    let aggregator = Arc::new(aggregator());
    let consumer = ConsumerAdapter::new(aggregator.clone());

    let mut event = MetricEvent::increment("library.errors.total");
    event.operation = "DECREMENT".to_string();

    assert!(consumer.handle(&event).is_ack());
    assert!(matches!(
        aggregator.apply(&event),
        AggregateOutcome::Skipped(SkipReason::UnknownOperation(op)) if op == "DECREMENT"
    ));
    assert_eq!(aggregator.store().count().unwrap(), 0);
}

#[test]
fn test_operation_names_are_case_insensitive() {
    let aggregator = aggregator();
    let mut event = MetricEvent::increment("library.errors.total");
    event.operation = " increment ".to_string();

    assert!(aggregator.apply(&event).is_applied());
    assert_eq!(stored(&aggregator, "library.errors.total").unwrap().value, 1);
}

#[test]
fn test_overflow_is_skipped_and_value_kept() {
    let aggregator = aggregator();
    aggregator.apply(&MetricEvent::set("huge", i64::MAX, MetricKind::Counter));

    assert!(matches!(
        aggregator.apply(&MetricEvent::increment("huge")),
        AggregateOutcome::Skipped(SkipReason::Overflow)
    ));
    let record = stored(&aggregator, "huge").unwrap();
    assert_eq!(record.value, i64::MAX);
    assert_eq!(record.version, 0);
}

#[test]
fn test_load_all_warms_counters_only() {
    let mut counter = MetricRecord {
        name: "library.errors.total".to_string(),
        value: 12,
        kind: MetricKind::Counter,
        description: None,
        last_updated_ms: 1,
        version: 4,
    };
    let gauge = MetricRecord {
        name: "library.queue.depth".to_string(),
        value: 3,
        kind: MetricKind::Gauge,
        ..counter.clone()
    };
    let store = InMemoryMetricStore::with_records([counter.clone(), gauge]);
    let aggregator = Aggregator::new(store);

    assert!(!aggregator.is_warmed());
    assert_eq!(aggregator.load_all().unwrap(), 1);
    assert!(aggregator.is_warmed());
    assert_eq!(aggregator.read_metric("library.errors.total"), Some(12));
    assert_eq!(aggregator.read_metric("library.queue.depth"), None);

    aggregator.apply(&MetricEvent::increment("library.errors.total"));
    counter.value = 13;
    counter.version = 5;
    let after = stored(&aggregator, "library.errors.total").unwrap();
    assert_eq!((after.value, after.version), (counter.value, counter.version));
    assert_eq!(aggregator.read_metric("library.errors.total"), Some(13));

    let counters = aggregator.read_all_counters().unwrap();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].name, "library.errors.total");
}

//! Deterministic Simulation Testing for the aggregation pipeline
//!
//! Drives the consumer adapter over a fault-injecting store with a seeded
//! workload and checks the store against a shadow model after every
//! acknowledged event.
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = AggregatorDSTHarness::new(AggregatorDSTConfig::new(seed));
//!     harness.run(500);
//!     harness.check_invariants();
//!     assert!(harness.result().is_success(), "seed {}", seed);
//! }
//! ```
//!
//! Each event is redelivered until acknowledged, as the transport would.
//! Ambiguous commits and phantom creators change the store behind the
//! consumer's back; the store reports them as injected effects and the
//! shadow model adds one per effect on INCREMENT, since an INCREMENT that
//! is applied and then redelivered is applied twice.

use super::aggregator::{Aggregator, IncrementStrategy};
use super::consumer::{AckDecision, ConsumerAdapter, ConsumerError};
use super::{MetricEvent, MetricKind, MetricOperation};
use crate::clock::SimulatedClock;
use crate::io::{Rng, SimulatedRng};
use crate::store::{
    InMemoryMetricStore, MetricStore, SimulatedMetricStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Configuration for aggregator DST
#[derive(Debug, Clone)]
pub struct AggregatorDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub store_config: SimulatedStoreConfig,
    pub strategy: IncrementStrategy,
    /// Distinct metric names the workload touches
    pub metric_names: u64,
    pub invalid_probability: f64,
    pub unknown_operation_probability: f64,
    pub set_probability: f64,
    pub reset_probability: f64,
    /// Chance an event starts a store outage of a few deliveries
    pub outage_probability: f64,
    /// Chance of rebuilding the aggregator from the store before an event
    pub restart_probability: f64,
    /// Deliveries before an event is dead-lettered
    pub max_deliveries: u32,
}

impl Default for AggregatorDSTConfig {
    fn default() -> Self {
        AggregatorDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            strategy: IncrementStrategy::Atomic,
            metric_names: 8,
            invalid_probability: 0.05,
            unknown_operation_probability: 0.03,
            set_probability: 0.2,
            reset_probability: 0.05,
            outage_probability: 0.02,
            restart_probability: 0.01,
            max_deliveries: 64,
        }
    }
}

impl AggregatorDSTConfig {
    pub fn new(seed: u64) -> Self {
        AggregatorDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no store faults
    pub fn calm(seed: u64) -> Self {
        AggregatorDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            outage_probability: 0.0,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection, few names for more races
    pub fn chaos(seed: u64) -> Self {
        AggregatorDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            metric_names: 3,
            outage_probability: 0.05,
            restart_probability: 0.03,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: IncrementStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Seeded event generator
pub struct AggregatorWorkload {
    rng: SimulatedRng,
    config: AggregatorDSTConfig,
    generated: u64,
}

impl AggregatorWorkload {
    pub fn new(config: AggregatorDSTConfig) -> Self {
        AggregatorWorkload {
            rng: SimulatedRng::new(config.seed),
            config,
            generated: 0,
        }
    }

    fn roll(&mut self) -> f64 {
        self.rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0
    }

    pub fn next_event(&mut self) -> MetricEvent {
        self.generated += 1;
        let name = format!("dst.metric.{}", self.rng.gen_range(0, self.config.metric_names));

        let c = &self.config;
        let (invalid, unknown, set, reset) = (
            c.invalid_probability,
            c.unknown_operation_probability,
            c.set_probability,
            c.reset_probability,
        );

        let roll = self.roll();
        let event = if roll < invalid {
            let mut event = MetricEvent::increment(name);
            match self.rng.gen_range(0, 3) {
                0 => event.name = " ".to_string(),
                1 => event.operation = String::new(),
                _ => event.value = None,
            }
            event
        } else if roll < invalid + unknown {
            let mut event = MetricEvent::increment(name);
            event.operation = "DECREMENT".to_string();
            event
        } else if roll < invalid + unknown + set {
            let kind = if self.rng.gen_bool(0.5) {
                MetricKind::Gauge
            } else {
                MetricKind::Counter
            };
            MetricEvent::set(name, self.rng.gen_range(0, 1_000) as i64, kind)
        } else if roll < invalid + unknown + set + reset {
            MetricEvent::reset(name)
        } else {
            MetricEvent::increment(name)
        };

        event.with_event_id(format!("dst-{}-{}", self.config.seed, self.generated))
    }
}

/// Result of a DST run
#[derive(Debug, Clone, Default)]
pub struct AggregatorDSTResult {
    pub seed: u64,
    pub events: u64,
    pub deliveries: u64,
    pub acknowledged: u64,
    pub redeliveries: u64,
    pub dead_lettered: u64,
    pub skipped: u64,
    pub outage_rejections: u64,
    pub restarts: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
}

impl AggregatorDSTResult {
    pub fn new(seed: u64) -> Self {
        AggregatorDSTResult {
            seed,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} events, {} deliveries ({} redelivered, {} dead), {} skipped, {} outage rejections, {} restarts, {} ambiguous, {} phantom, {} violations",
            self.seed,
            self.events,
            self.deliveries,
            self.redeliveries,
            self.dead_lettered,
            self.skipped,
            self.outage_rejections,
            self.restarts,
            self.store_stats.ambiguous_commits,
            self.store_stats.phantom_creates,
            self.invariant_violations.len()
        )
    }
}

type DSTStore = SimulatedMetricStore<InMemoryMetricStore, SimulatedRng>;

/// Main DST harness for the consumer/aggregator pipeline
pub struct AggregatorDSTHarness {
    config: AggregatorDSTConfig,
    store: Arc<DSTStore>,
    clock: SimulatedClock,
    consumer: ConsumerAdapter<Arc<DSTStore>>,
    workload: AggregatorWorkload,
    /// Ground truth for names whose history is fully known
    expected: HashMap<String, i64>,
    /// Names touched by a dead-lettered event
    uncertain: HashSet<String>,
    last_version: HashMap<String, u64>,
    outage_remaining: u32,
    result: AggregatorDSTResult,
}

impl AggregatorDSTHarness {
    pub fn new(config: AggregatorDSTConfig) -> Self {
        let clock = SimulatedClock::new(1_700_000_000_000);
        let inner = InMemoryMetricStore::with_clock(Arc::new(clock.clone()));
        // Different seed for the store
        let rng = SimulatedRng::new(config.seed.wrapping_add(1));
        let store = Arc::new(SimulatedMetricStore::new(
            inner,
            rng,
            config.store_config.clone(),
        ));
        let consumer = Self::build_consumer(&store, config.strategy);

        AggregatorDSTHarness {
            workload: AggregatorWorkload::new(config.clone()),
            result: AggregatorDSTResult::new(config.seed),
            config,
            store,
            clock,
            consumer,
            expected: HashMap::new(),
            uncertain: HashSet::new(),
            last_version: HashMap::new(),
            outage_remaining: 0,
        }
    }

    fn build_consumer(store: &Arc<DSTStore>, strategy: IncrementStrategy) -> ConsumerAdapter<Arc<DSTStore>> {
        ConsumerAdapter::new(Arc::new(Aggregator::with_strategy(store.clone(), strategy)))
    }

    pub fn run(&mut self, events: usize) {
        for _ in 0..events {
            if self.workload.roll() < self.config.restart_probability {
                self.restart();
            }
            if self.outage_remaining == 0 && self.workload.roll() < self.config.outage_probability {
                self.outage_remaining = self.workload.rng.gen_range(1, 5) as u32;
                self.store.set_available(false);
            }

            let event = self.workload.next_event();
            self.clock.advance_ms(self.workload.rng.gen_range(1, 50));
            self.deliver(&event);
        }
    }

    /// Redeliver until acknowledged or dead-lettered
    fn deliver(&mut self, event: &MetricEvent) {
        self.result.events += 1;
        let valid = super::validator::validate(event);
        let operation = event.parsed_operation();
        let mut extra = 0i64;

        for attempt in 1..=self.config.max_deliveries {
            self.result.deliveries += 1;
            if attempt > 1 {
                self.result.redeliveries += 1;
            }

            let in_outage = self.outage_remaining > 0;
            let writes_before = self.store.stats().writes_attempted;
            let decision = self.consumer.handle(event);
            let writes = self.store.stats().writes_attempted - writes_before;

            if in_outage {
                self.outage_remaining -= 1;
                if self.outage_remaining == 0 {
                    self.store.set_available(true);
                }
            }

            for effect in self.store.take_effects() {
                if effect.name == event.name && operation == Some(MetricOperation::Increment) {
                    extra += 1;
                }
            }

            if (!valid || operation.is_none()) && writes != 0 {
                self.violation(format!(
                    "{} ({}) caused {} store writes",
                    event.event_id, event.operation, writes
                ));
            }
            if !valid && !decision.is_ack() {
                self.violation(format!("{} was invalid but not acknowledged", event.event_id));
            }

            match decision {
                AckDecision::Acknowledge => {
                    self.result.acknowledged += 1;
                    if valid && operation.is_some() {
                        self.record_applied(event, extra);
                    } else {
                        self.result.skipped += 1;
                    }
                    return;
                }
                AckDecision::DoNotAcknowledge(ConsumerError::StoreUnavailable(_)) => {
                    if writes != 0 {
                        self.violation(format!(
                            "{} hit an unavailable store but made {} writes",
                            event.event_id, writes
                        ));
                    }
                    if in_outage {
                        self.result.outage_rejections += 1;
                    }
                }
                AckDecision::DoNotAcknowledge(ConsumerError::Persistence(_)) => {
                    if in_outage {
                        self.violation(format!("{} got past the probe during an outage", event.event_id));
                    }
                }
            }
        }

        self.result.dead_lettered += 1;
        self.uncertain.insert(event.name.clone());
    }

    fn record_applied(&mut self, event: &MetricEvent, extra: i64) {
        let name = &event.name;
        match event.parsed_operation() {
            Some(MetricOperation::Increment) => {
                if !self.uncertain.contains(name) {
                    let current = self.expected.get(name).copied().unwrap_or(0);
                    self.expected.insert(name.clone(), current + 1 + extra);
                }
            }
            Some(MetricOperation::Set) => {
                self.uncertain.remove(name);
                self.expected.insert(name.clone(), event.value.unwrap_or_default());
            }
            Some(MetricOperation::Reset) => {
                if let Some(value) = self.expected.get_mut(name) {
                    *value = 0;
                }
            }
            None => return,
        }
        self.check_metric(name);
    }

    /// Store, shadow and cache agree on `name`
    fn check_metric(&mut self, name: &str) {
        let stored = match self.store.inner().get(name) {
            Ok(stored) => stored,
            Err(e) => {
                self.violation(format!("in-memory store failed: {}", e));
                return;
            }
        };

        if let Some(record) = &stored {
            if let Some(&last) = self.last_version.get(name) {
                if record.version < last {
                    self.violation(format!(
                        "{} version went backwards: {} -> {}",
                        name, last, record.version
                    ));
                }
            }
            self.last_version.insert(name.to_string(), record.version);
        }

        if self.uncertain.contains(name) {
            return;
        }

        let actual = stored.as_ref().map(|r| r.value);
        let expected = self.expected.get(name).copied();
        if actual != expected {
            self.violation(format!(
                "{}: store has {:?}, shadow expects {:?}",
                name, actual, expected
            ));
        }

        let cached = self.consumer.aggregator().read_metric(name);
        if cached != actual {
            self.violation(format!(
                "{}: cache has {:?} after ack, store has {:?}",
                name, cached, actual
            ));
        }
    }

    /// Rebuild the aggregator as a process restart would
    fn restart(&mut self) {
        self.result.restarts += 1;
        self.consumer = Self::build_consumer(&self.store, self.config.strategy);

        let loaded = {
            let _quiet = crate::suppress_buggify!();
            let was_available = self.store.is_available();
            self.store.set_available(true);
            let loaded = self.consumer.aggregator().load_all();
            self.store.set_available(was_available);
            loaded
        };
        if let Err(e) = loaded {
            self.violation(format!("cache warm-up failed: {}", e));
            return;
        }

        let counters = self
            .store
            .inner()
            .list_by_kind(MetricKind::Counter)
            .unwrap_or_default();
        let cache = self.consumer.aggregator().cache();
        if cache.len() != counters.len() {
            self.result.invariant_violations.push(format!(
                "warm cache holds {} entries for {} stored counters",
                cache.len(),
                counters.len()
            ));
        }
        for record in counters {
            if cache.get(&record.name) != Some(record.value) {
                self.result
                    .invariant_violations
                    .push(format!("{} not restored into cache", record.name));
            }
        }
    }

    /// Final whole-store check against the shadow model
    pub fn check_invariants(&mut self) {
        self.store.set_available(true);
        self.outage_remaining = 0;

        let records = self.store.inner().list_all().unwrap_or_default();
        for record in &records {
            if self.uncertain.contains(&record.name) {
                continue;
            }
            match self.expected.get(&record.name) {
                Some(&value) if value == record.value => {}
                Some(&value) => self.violation(format!(
                    "{}: final store value {}, shadow expects {}",
                    record.name, record.value, value
                )),
                None => self.violation(format!("{} exists but was never created", record.name)),
            }
        }

        let stored: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let missing: Vec<String> = self
            .expected
            .keys()
            .filter(|name| !stored.contains(name.as_str()) && !self.uncertain.contains(*name))
            .cloned()
            .collect();
        for name in missing {
            self.violation(format!("{} was acknowledged but is missing", name));
        }

        self.result.store_stats = self.store.stats();
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(message);
    }

    pub fn result(&self) -> &AggregatorDSTResult {
        &self.result
    }

    pub fn into_result(self) -> AggregatorDSTResult {
        self.result
    }
}

/// Run one harness per seed
pub fn run_dst_batch(
    seeds: impl IntoIterator<Item = u64>,
    events_per_run: usize,
    config_fn: impl Fn(u64) -> AggregatorDSTConfig,
) -> Vec<AggregatorDSTResult> {
    seeds
        .into_iter()
        .map(|seed| {
            let mut harness = AggregatorDSTHarness::new(config_fn(seed));
            harness.run(events_per_run);
            harness.check_invariants();
            harness.into_result()
        })
        .collect()
}

pub fn summarize_batch(results: &[AggregatorDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_events: u64 = results.iter().map(|r| r.events).sum();
    let total_redeliveries: u64 = results.iter().map(|r| r.redeliveries).sum();
    let total_restarts: u64 = results.iter().map(|r| r.restarts).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} events, {} redeliveries, {} restarts",
        passed, total, total_events, total_redeliveries, total_restarts
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

//! Simulated Metric Store with Fault Injection
//!
//! Wraps another `MetricStore` and injects faults through buggify, driven by
//! a seeded `Rng` so a failing simulation seed replays exactly.
//!
//! Faults that change stored state behind the caller's back (ambiguous
//! commits, phantom creates) are recorded as `InjectedEffect`s so a
//! simulation can account for them in its shadow state.

use super::{CasOutcome, MetricStore, StoreError};
use crate::buggify::faults::store as faults;
use crate::buggify::FaultConfig;
use crate::io::{Rng, SimulatedRng};
use crate::metrics::{MetricKind, MetricRecord, NewMetricRecord};
use parking_lot::Mutex;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fault probabilities for the simulated store
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    pub faults: FaultConfig,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        Self::moderate()
    }
}

impl SimulatedStoreConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            faults: FaultConfig::new(),
        }
    }

    pub fn moderate() -> Self {
        SimulatedStoreConfig {
            faults: FaultConfig::new()
                .with(faults::UNAVAILABLE, 0.02)
                .with(faults::WRITE_FAIL, 0.02)
                .with(faults::AMBIGUOUS_COMMIT, 0.01)
                .with(faults::PHANTOM_CREATE, 0.05)
                .with(faults::ZERO_ROWS, 0.02)
                .with(faults::READ_FAIL, 0.01),
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            faults: FaultConfig::new()
                .with(faults::UNAVAILABLE, 0.10)
                .with(faults::WRITE_FAIL, 0.10)
                .with(faults::AMBIGUOUS_COMMIT, 0.05)
                .with(faults::PHANTOM_CREATE, 0.20)
                .with(faults::ZERO_ROWS, 0.10)
                .with(faults::READ_FAIL, 0.05),
        }
    }

    pub fn with(mut self, fault_id: &str, probability: f64) -> Self {
        self.faults = self.faults.with(fault_id, probability);
        self
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub pings: u64,
    pub ping_failures: u64,
    pub reads: u64,
    pub read_failures: u64,
    pub writes_attempted: u64,
    pub writes_committed: u64,
    pub write_failures: u64,
    pub ambiguous_commits: u64,
    pub phantom_creates: u64,
    pub zero_rows: u64,
}

/// A fault that changed stored state without the caller seeing it succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedEffect {
    pub fault: &'static str,
    pub name: String,
}

struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
    effects: Vec<InjectedEffect>,
}

/// Fault-injecting wrapper around another store
pub struct SimulatedMetricStore<S: MetricStore, R: Rng = SimulatedRng> {
    inner_store: S,
    config: SimulatedStoreConfig,
    available: AtomicBool,
    state: Mutex<SimulatedStoreInner<R>>,
}

impl<S: MetricStore, R: Rng> SimulatedMetricStore<S, R> {
    pub fn new(inner_store: S, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedMetricStore {
            inner_store,
            config,
            available: AtomicBool::new(true),
            state: Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
                effects: Vec::new(),
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    /// Take the store down (or bring it back); while down every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Drain the state changes injected since the last call
    pub fn take_effects(&self) -> Vec<InjectedEffect> {
        std::mem::take(&mut self.state.lock().effects)
    }

    fn roll(&self, fault_id: &str) -> bool {
        let mut state = self.state.lock();
        crate::buggify!(&mut state.rng, fault_id, config = &self.config.faults)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        }
    }

    fn read<T>(&self, op: impl FnOnce(&S) -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.check_available()?;
        self.state.lock().stats.reads += 1;
        if self.roll(faults::READ_FAIL) {
            self.state.lock().stats.read_failures += 1;
            return Err(StoreError::Io(IoError::new(
                ErrorKind::Other,
                "simulated read failure",
            )));
        }
        op(&self.inner_store)
    }

    /// Run a write against the inner store with write-path faults applied.
    ///
    /// `committed` tells whether the inner result actually changed state.
    fn write<T>(
        &self,
        name: &str,
        op: impl FnOnce(&S) -> Result<T, StoreError>,
        committed: impl Fn(&T) -> bool,
    ) -> Result<T, StoreError> {
        self.check_available()?;
        self.state.lock().stats.writes_attempted += 1;

        if self.roll(faults::WRITE_FAIL) {
            self.state.lock().stats.write_failures += 1;
            return Err(StoreError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }

        let result = op(&self.inner_store)?;
        if !committed(&result) {
            return Ok(result);
        }
        self.state.lock().stats.writes_committed += 1;

        if self.roll(faults::AMBIGUOUS_COMMIT) {
            let mut state = self.state.lock();
            state.stats.ambiguous_commits += 1;
            state.effects.push(InjectedEffect {
                fault: faults::AMBIGUOUS_COMMIT,
                name: name.to_string(),
            });
            return Err(StoreError::Io(IoError::new(
                ErrorKind::TimedOut,
                "simulated ambiguous commit",
            )));
        }
        Ok(result)
    }
}

impl<S: MetricStore, R: Rng> MetricStore for SimulatedMetricStore<S, R> {
    fn get(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.read(|s| s.get(name))
    }

    fn insert(&self, record: NewMetricRecord) -> Result<MetricRecord, StoreError> {
        self.check_available()?;

        // Another writer wins the create race just before us
        if self.roll(faults::PHANTOM_CREATE) {
            let phantom = NewMetricRecord {
                value: 1,
                ..record.clone()
            };
            if self.inner_store.insert(phantom).is_ok() {
                let mut state = self.state.lock();
                state.stats.phantom_creates += 1;
                state.effects.push(InjectedEffect {
                    fault: faults::PHANTOM_CREATE,
                    name: record.name.clone(),
                });
            }
        }

        let name = record.name.clone();
        self.write(&name, |s| s.insert(record), |_| true)
    }

    fn increment_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.check_available()?;
        if self.roll(faults::ZERO_ROWS) {
            self.state.lock().stats.zero_rows += 1;
            return Ok(None);
        }
        self.write(name, |s| s.increment_if_exists(name), Option::is_some)
    }

    fn set_if_exists(&self, name: &str, value: i64) -> Result<Option<MetricRecord>, StoreError> {
        self.write(name, |s| s.set_if_exists(name, value), Option::is_some)
    }

    fn reset_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.write(name, |s| s.reset_if_exists(name), Option::is_some)
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
    ) -> Result<CasOutcome, StoreError> {
        self.write(
            name,
            |s| s.compare_and_swap(name, expected_version, value),
            |outcome| matches!(outcome, CasOutcome::Swapped(_)),
        )
    }

    fn list_by_kind(&self, kind: MetricKind) -> Result<Vec<MetricRecord>, StoreError> {
        self.read(|s| s.list_by_kind(kind))
    }

    fn list_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        self.read(|s| s.list_all())
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.read(|s| s.count())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.lock().stats.pings += 1;
        if self.roll(faults::UNAVAILABLE) {
            self.state.lock().stats.ping_failures += 1;
            return Err(StoreError::Unavailable(
                "simulated connection refused".to_string(),
            ));
        }
        self.inner_store.ping()
    }
}

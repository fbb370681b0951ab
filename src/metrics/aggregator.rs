//! Aggregator
//!
//! Applies validated metric events to the store and mirrors every committed
//! image into the cache. Correctness rests entirely on the store's atomic
//! conditional updates; the cache is never read to decide an outcome.
//!
//! ## Protocol
//!
//! ```text
//! INCREMENT (atomic)
//!   increment_if_exists ──Some──▶ Applied
//!        │ None
//!        ▼
//!   insert(value = 1) ──Ok──▶ Applied (created)
//!        │ UniqueViolation
//!        ▼
//!   increment_if_exists ──Some──▶ Applied (race retried)
//!        │ None
//!        ▼
//!   FailedRetryable(RaceRetryExhausted)
//!
//! SET    get ─▶ set_if_exists | insert(value), one overwrite retry on UniqueViolation
//! RESET  reset_if_exists; a missing row is a successful no-op
//! ```

use super::cache::MetricCache;
use super::validator::{self, Rejection};
use super::{MetricEvent, MetricKind, MetricOperation, MetricRecord, NewMetricRecord};
use crate::store::{CasOutcome, MetricStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// How INCREMENT reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncrementStrategy {
    /// Single conditional `value = value + 1` statement
    #[default]
    Atomic,
    /// Read, then versioned compare-and-swap, at most `max_attempts` times
    Optimistic { max_attempts: u32 },
}

/// Failures that leave the event worth redelivering
#[derive(Debug)]
pub enum AggregateError {
    Store(StoreError),
    /// The create race was lost and the single retry still matched no row
    RaceRetryExhausted { name: String },
    /// Optimistic increment kept losing to concurrent writers
    VersionConflict { name: String, attempts: u32 },
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::Store(e) => write!(f, "{}", e),
            AggregateError::RaceRetryExhausted { name } => {
                write!(f, "Create race retry exhausted for metric: {}", name)
            }
            AggregateError::VersionConflict { name, attempts } => write!(
                f,
                "Version conflict on metric {} after {} attempts",
                name, attempts
            ),
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregateError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for AggregateError {
    fn from(e: StoreError) -> Self {
        AggregateError::Store(e)
    }
}

/// Why an event was dropped without a store write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Invalid(Rejection),
    UnknownOperation(String),
    /// Increment would overflow `i64`; replaying cannot succeed
    Overflow,
}

/// A mutation that reached the store
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppliedMutation {
    /// Committed image; `None` when RESET found nothing to reset
    pub record: Option<MetricRecord>,
    /// This event created the record
    pub created: bool,
    /// A lost create race was retried
    pub race_retried: bool,
}

impl AppliedMutation {
    fn updated(record: MetricRecord) -> Self {
        AppliedMutation {
            record: Some(record),
            ..Default::default()
        }
    }

    fn created(record: MetricRecord) -> Self {
        AppliedMutation {
            record: Some(record),
            created: true,
            race_retried: false,
        }
    }

    fn after_race(record: MetricRecord) -> Self {
        AppliedMutation {
            record: Some(record),
            created: false,
            race_retried: true,
        }
    }
}

/// Definitive result of applying one event
#[derive(Debug)]
pub enum AggregateOutcome {
    Applied(AppliedMutation),
    Skipped(SkipReason),
    FailedRetryable(AggregateError),
}

impl AggregateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AggregateOutcome::Applied(_))
    }

    /// Applied and skipped events are both terminal for a delivery
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AggregateOutcome::FailedRetryable(_))
    }

    /// Persisted value after the event, if it wrote one
    pub fn value(&self) -> Option<i64> {
        match self {
            AggregateOutcome::Applied(m) => m.record.as_ref().map(|r| r.value),
            _ => None,
        }
    }
}

/// Owns the cache and a store handle; shared by every worker
pub struct Aggregator<S: MetricStore> {
    store: S,
    cache: MetricCache,
    strategy: IncrementStrategy,
    warmed: AtomicBool,
}

impl<S: MetricStore> Aggregator<S> {
    pub fn new(store: S) -> Self {
        Self::with_strategy(store, IncrementStrategy::Atomic)
    }

    pub fn with_strategy(store: S, strategy: IncrementStrategy) -> Self {
        Aggregator {
            store,
            cache: MetricCache::new(),
            strategy,
            warmed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    pub fn strategy(&self) -> IncrementStrategy {
        self.strategy
    }

    /// Warm the cache from every stored counter. Call before serving events.
    pub fn load_all(&self) -> Result<usize, StoreError> {
        let counters = self.store.list_by_kind(MetricKind::Counter)?;
        let loaded = self.cache.load_all(&counters);
        self.warmed.store(true, Ordering::Release);
        info!("Restored {} counters from store", loaded);
        Ok(loaded)
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::Acquire)
    }

    /// Cached value, possibly slightly stale
    #[inline]
    pub fn read_metric(&self, name: &str) -> Option<i64> {
        self.cache.get(name)
    }

    /// Authoritative counter listing from the store
    pub fn read_all_counters(&self) -> Result<Vec<MetricRecord>, StoreError> {
        self.store.list_by_kind(MetricKind::Counter)
    }

    /// Apply one event
    pub fn apply(&self, event: &MetricEvent) -> AggregateOutcome {
        let value = match validator::check(event).and(event.value.ok_or(Rejection::MissingValue)) {
            Ok(value) => value,
            Err(rejection) => {
                warn!(event_id = %event.event_id, "Invalid metric event skipped: {}", rejection);
                return AggregateOutcome::Skipped(SkipReason::Invalid(rejection));
            }
        };

        let Some(operation) = event.parsed_operation() else {
            warn!(
                metric = %event.name,
                event_id = %event.event_id,
                "Unknown metric operation: {}",
                event.operation
            );
            return AggregateOutcome::Skipped(SkipReason::UnknownOperation(
                event.operation.trim().to_string(),
            ));
        };

        let result = match operation {
            MetricOperation::Increment => self.increment(event, value),
            MetricOperation::Set => self.set(event, value),
            MetricOperation::Reset => self.reset(event),
        };

        match result {
            Ok(applied) => {
                if let Some(record) = &applied.record {
                    self.cache.observe(record);
                    debug!(
                        metric = %record.name,
                        version = record.version,
                        "Applied {}: value={}",
                        operation,
                        record.value
                    );
                } else {
                    debug!(metric = %event.name, "{} matched no record", operation);
                }
                AggregateOutcome::Applied(applied)
            }
            Err(AggregateError::Store(StoreError::Overflow { name })) => {
                error!(metric = %name, event_id = %event.event_id, "{} would overflow, event dropped", operation);
                AggregateOutcome::Skipped(SkipReason::Overflow)
            }
            Err(e) => {
                error!(metric = %event.name, event_id = %event.event_id, "Failed to apply {}: {}", operation, e);
                AggregateOutcome::FailedRetryable(e)
            }
        }
    }

    fn increment(&self, event: &MetricEvent, advisory: i64) -> Result<AppliedMutation, AggregateError> {
        if advisory != 1 {
            debug!(metric = %event.name, "Ignoring increment value {}", advisory);
        }
        match self.strategy {
            IncrementStrategy::Atomic => self.increment_atomic(event),
            IncrementStrategy::Optimistic { max_attempts } => {
                self.increment_optimistic(event, max_attempts.max(1))
            }
        }
    }

    fn increment_atomic(&self, event: &MetricEvent) -> Result<AppliedMutation, AggregateError> {
        let name = &event.name;
        if let Some(record) = self.store.increment_if_exists(name)? {
            return Ok(AppliedMutation::updated(record));
        }

        match self.store.insert(NewMetricRecord::from_event(event, 1)) {
            Ok(record) => Ok(AppliedMutation::created(record)),
            Err(StoreError::UniqueViolation(_)) => {
                debug!(metric = %name, "Lost create race, retrying increment");
                match self.store.increment_if_exists(name)? {
                    Some(record) => Ok(AppliedMutation::after_race(record)),
                    None => Err(AggregateError::RaceRetryExhausted { name: name.clone() }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn increment_optimistic(
        &self,
        event: &MetricEvent,
        max_attempts: u32,
    ) -> Result<AppliedMutation, AggregateError> {
        let name = &event.name;
        let mut race_retried = false;
        // A lost create race re-enters the loop without spending an attempt
        let mut attempt = 0;

        while attempt < max_attempts {
            let Some(current) = self.store.get(name)? else {
                if race_retried {
                    return Err(AggregateError::RaceRetryExhausted { name: name.clone() });
                }
                match self.store.insert(NewMetricRecord::from_event(event, 1)) {
                    Ok(record) => return Ok(AppliedMutation::created(record)),
                    Err(StoreError::UniqueViolation(_)) => {
                        debug!(metric = %name, "Lost create race, retrying increment");
                        race_retried = true;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            attempt += 1;
            let next = current
                .value
                .checked_add(1)
                .ok_or_else(|| StoreError::Overflow { name: name.clone() })?;

            match self.store.compare_and_swap(name, current.version, next)? {
                CasOutcome::Swapped(record) => {
                    return Ok(AppliedMutation {
                        record: Some(record),
                        created: false,
                        race_retried,
                    })
                }
                CasOutcome::VersionMismatch { current: seen } => {
                    debug!(
                        metric = %name,
                        "Version moved from {} to {} (attempt {}/{})",
                        current.version,
                        seen,
                        attempt,
                        max_attempts
                    );
                }
                CasOutcome::Missing => {
                    debug!(metric = %name, "Record vanished during compare-and-swap");
                }
            }
        }

        Err(AggregateError::VersionConflict {
            name: name.clone(),
            attempts: max_attempts,
        })
    }

    fn set(&self, event: &MetricEvent, value: i64) -> Result<AppliedMutation, AggregateError> {
        let name = &event.name;
        if self.store.get(name)?.is_some() {
            if let Some(record) = self.store.set_if_exists(name, value)? {
                return Ok(AppliedMutation::updated(record));
            }
        }

        match self.store.insert(NewMetricRecord::from_event(event, value)) {
            Ok(record) => Ok(AppliedMutation::created(record)),
            Err(StoreError::UniqueViolation(_)) => {
                debug!(metric = %name, "Lost create race, retrying set");
                match self.store.set_if_exists(name, value)? {
                    Some(record) => Ok(AppliedMutation::after_race(record)),
                    None => Err(AggregateError::RaceRetryExhausted { name: name.clone() }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&self, event: &MetricEvent) -> Result<AppliedMutation, AggregateError> {
        Ok(AppliedMutation {
            record: self.store.reset_if_exists(&event.name)?,
            ..Default::default()
        })
    }
}

impl<S: MetricStore> std::fmt::Debug for Aggregator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("strategy", &self.strategy)
            .field("cached", &self.cache.len())
            .field("warmed", &self.is_warmed())
            .finish()
    }
}

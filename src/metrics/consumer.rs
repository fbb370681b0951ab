//! Consumer Adapter
//!
//! Turns each delivery into an acknowledge decision for the transport:
//!
//! ```text
//! RECEIVED ─▶ REJECTED ───────────────────────────────▶ ack
//!        └──▶ VALIDATED ─▶ STORE_CHECK ─▶ UNHEALTHY ─▶ no ack
//!                                     └─▶ MUTATE ─▶ APPLIED / SKIPPED ─▶ ack
//!                                               └─▶ FAILED_RETRYABLE ─▶ no ack
//! ```
//!
//! No local retry loop: a no-ack relies on transport redelivery.

use super::aggregator::{AggregateError, AggregateOutcome, Aggregator};
use super::validator;
use super::MetricEvent;
use crate::store::{MetricStore, StoreError};
use crate::transport::codec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Why a delivery was left unacknowledged
#[derive(Debug)]
pub enum ConsumerError {
    /// Liveness probe failed; no mutation was attempted
    StoreUnavailable(StoreError),
    Persistence(AggregateError),
}

impl std::fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerError::StoreUnavailable(e) => write!(f, "Store health check failed: {}", e),
            ConsumerError::Persistence(e) => write!(f, "Persistence failure: {}", e),
        }
    }
}

impl std::error::Error for ConsumerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsumerError::StoreUnavailable(e) => Some(e),
            ConsumerError::Persistence(e) => Some(e),
        }
    }
}

#[derive(Debug)]
pub enum AckDecision {
    Acknowledge,
    /// Leave the delivery for redelivery; carries the cause for logging
    DoNotAcknowledge(ConsumerError),
}

impl AckDecision {
    pub fn is_ack(&self) -> bool {
        matches!(self, AckDecision::Acknowledge)
    }
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    undecodable: AtomicU64,
    rejected: AtomicU64,
    store_unavailable: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    race_retries: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub undecodable: u64,
    pub rejected: u64,
    pub store_unavailable: u64,
    pub applied: u64,
    pub skipped: u64,
    pub race_retries: u64,
    pub failed: u64,
}

impl ConsumerStatsSnapshot {
    pub fn acknowledged(&self) -> u64 {
        self.undecodable + self.rejected + self.applied + self.skipped
    }
}

impl ConsumerStats {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            store_unavailable: self.store_unavailable.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            race_retries: self.race_retries.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Shared between workers; clones share the aggregator and stats
pub struct ConsumerAdapter<S: MetricStore> {
    aggregator: Arc<Aggregator<S>>,
    stats: Arc<ConsumerStats>,
}

impl<S: MetricStore> Clone for ConsumerAdapter<S> {
    fn clone(&self) -> Self {
        ConsumerAdapter {
            aggregator: self.aggregator.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<S: MetricStore> ConsumerAdapter<S> {
    pub fn new(aggregator: Arc<Aggregator<S>>) -> Self {
        ConsumerAdapter {
            aggregator,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator<S>> {
        &self.aggregator
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decode a wire payload and handle it.
    ///
    /// An undecodable payload can never succeed, so it is acknowledged.
    pub fn handle_payload(&self, payload: &[u8]) -> AckDecision {
        match codec::decode(payload) {
            Ok(event) => self.handle(&event),
            Err(e) => {
                ConsumerStats::bump(&self.stats.received);
                ConsumerStats::bump(&self.stats.undecodable);
                warn!("Dropping undecodable metric payload ({} bytes): {}", payload.len(), e);
                AckDecision::Acknowledge
            }
        }
    }

    pub fn handle(&self, event: &MetricEvent) -> AckDecision {
        ConsumerStats::bump(&self.stats.received);

        if let Err(rejection) = validator::check(event) {
            ConsumerStats::bump(&self.stats.rejected);
            warn!(event_id = %event.event_id, "Invalid metric event received: {}", rejection);
            return AckDecision::Acknowledge;
        }

        if let Err(e) = self.aggregator.store().ping() {
            ConsumerStats::bump(&self.stats.store_unavailable);
            error!(metric = %event.name, event_id = %event.event_id, "Metric store unavailable: {}", e);
            return AckDecision::DoNotAcknowledge(ConsumerError::StoreUnavailable(e));
        }

        match self.aggregator.apply(event) {
            AggregateOutcome::Applied(mutation) => {
                ConsumerStats::bump(&self.stats.applied);
                if mutation.race_retried {
                    ConsumerStats::bump(&self.stats.race_retries);
                }
                debug!(metric = %event.name, event_id = %event.event_id, "Metric event processed");
                AckDecision::Acknowledge
            }
            AggregateOutcome::Skipped(reason) => {
                ConsumerStats::bump(&self.stats.skipped);
                debug!(metric = %event.name, "Metric event skipped: {:?}", reason);
                AckDecision::Acknowledge
            }
            AggregateOutcome::FailedRetryable(e) => {
                ConsumerStats::bump(&self.stats.failed);
                AckDecision::DoNotAcknowledge(ConsumerError::Persistence(e))
            }
        }
    }
}

impl<S: MetricStore> std::fmt::Debug for ConsumerAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerAdapter")
            .field("aggregator", &self.aggregator)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

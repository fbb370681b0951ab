//! Clock abstraction
//!
//! Stores stamp `last_updated_ms` through this trait so that simulation runs
//! get controlled, reproducible timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for record timestamps (Unix ms)
pub trait MetricClock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;

    fn elapsed(&self, since_ms: u64) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(since_ms))
    }
}

/// Wall clock, monotonic after construction
#[derive(Clone)]
pub struct ProductionClock {
    start: Instant,
    start_millis: u64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ProductionClock {
            start: Instant::now(),
            start_millis,
        }
    }
}

impl MetricClock for ProductionClock {
    fn now_ms(&self) -> u64 {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.start_millis.saturating_add(elapsed)
    }
}

/// Virtual clock for deterministic tests
///
/// Time only advances via `advance_ms()` or `set()`. Clones share state.
#[derive(Clone, Default)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl MetricClock for SimulatedClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}

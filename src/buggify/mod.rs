//! BUGGIFY - seeded fault injection
//!
//! Every fault decision draws from a caller-supplied `Rng`, so a failing
//! simulation seed replays the exact same fault sequence.
//!
//! ```ignore
//! if buggify!(&mut rng, faults::store::WRITE_FAIL, config.write_fail_prob) {
//!     return Err(StoreError::Unavailable("simulated write failure".into()));
//! }
//! ```
//!
//! Checks and triggers are counted per thread; `suppress_buggify!()` turns
//! every check off for the lifetime of the returned guard.

pub mod config;
pub mod faults;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;

use crate::io::Rng;
use std::cell::RefCell;
use std::collections::HashMap;

/// Per-fault check and trigger counts
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    pub checks: HashMap<String, u64>,
    pub triggers: HashMap<String, u64>,
}

impl BuggifyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&mut self, fault_id: &str) {
        *self.checks.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn record_trigger(&mut self, fault_id: &str) {
        *self.triggers.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn triggered(&self, fault_id: &str) -> u64 {
        self.triggers.get(fault_id).copied().unwrap_or(0)
    }

    pub fn trigger_rate(&self, fault_id: &str) -> f64 {
        let checks = self.checks.get(fault_id).copied().unwrap_or(0);
        if checks == 0 {
            0.0
        } else {
            self.triggered(fault_id) as f64 / checks as f64
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = vec!["BUGGIFY Statistics:".to_string()];

        let mut sorted_faults: Vec<_> = self.checks.keys().collect();
        sorted_faults.sort();

        for fault_id in sorted_faults {
            let checks = self.checks.get(fault_id).copied().unwrap_or(0);
            lines.push(format!(
                "  {}: {}/{} ({:.2}%)",
                fault_id,
                self.triggered(fault_id),
                checks,
                self.trigger_rate(fault_id) * 100.0
            ));
        }

        lines.join("\n")
    }
}

#[derive(Debug, Default)]
struct BuggifyContext {
    stats: BuggifyStats,
    suppressed: bool,
}

thread_local! {
    static BUGGIFY_CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

/// Stats for the current thread
pub fn get_stats() -> BuggifyStats {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

pub fn reset_stats() {
    BUGGIFY_CONTEXT.with(|ctx| {
        ctx.borrow_mut().stats = BuggifyStats::new();
    });
}

/// Disables buggify on this thread until dropped
pub struct BuggifySuppressor {
    previous: bool,
}

impl BuggifySuppressor {
    pub fn new() -> Self {
        let previous = BUGGIFY_CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            std::mem::replace(&mut ctx.suppressed, true)
        });
        BuggifySuppressor { previous }
    }
}

impl Default for BuggifySuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BuggifySuppressor {
    fn drop(&mut self) {
        let previous = self.previous;
        BUGGIFY_CONTEXT.with(|ctx| {
            ctx.borrow_mut().suppressed = previous;
        });
    }
}

/// Decide whether `fault_id` fires with the given probability
#[inline]
pub fn should_buggify_with_prob<R: Rng>(rng: &mut R, fault_id: &str, probability: f64) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();

        ctx.stats.record_check(fault_id);

        if ctx.suppressed || probability <= 0.0 {
            return false;
        }

        let random_value = rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0;
        let triggered = random_value < probability.clamp(0.0, 1.0);

        if triggered {
            ctx.stats.record_trigger(fault_id);
        }

        triggered
    })
}

/// Decide whether `fault_id` fires, using the probability from `config`
#[inline]
pub fn should_buggify<R: Rng>(rng: &mut R, fault_id: &str, config: &FaultConfig) -> bool {
    should_buggify_with_prob(rng, fault_id, config.get(fault_id))
}

/// Main fault-injection entry point
///
/// `buggify!(rng, id, probability)` or `buggify!(rng, id, config = &cfg)`.
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr, config = $config:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id, $config)
    };
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify_with_prob($rng, $fault_id, $prob)
    };
}

/// Suppress all buggify checks within a scope
#[macro_export]
macro_rules! suppress_buggify {
    () => {
        $crate::buggify::BuggifySuppressor::new()
    };
}

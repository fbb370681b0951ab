//! Metric Cache
//!
//! Process-local `name -> value` mirror of the store for low-latency reads.
//! Written only after a store commit, never consulted for correctness.

use super::{MetricKind, MetricRecord};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    value: i64,
    /// Store version the value was read at; `None` for unversioned writes
    version: Option<u64>,
}

/// Shared metric cache; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MetricCache {
    entries: Arc<RwLock<AHashMap<String, CacheEntry>>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries.read().get(name).map(|e| e.value)
    }

    /// Unconditional overwrite
    pub fn set(&self, name: impl Into<String>, value: i64) {
        self.entries.write().insert(
            name.into(),
            CacheEntry {
                value,
                version: None,
            },
        );
    }

    /// Mirror a committed record image.
    ///
    /// Workers finishing out of order must not roll the cache back, so an
    /// image older than the one already cached is ignored. Returns whether
    /// the cache changed.
    pub fn observe(&self, record: &MetricRecord) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(&record.name) {
            Some(entry) if entry.version.is_some_and(|v| v >= record.version) => false,
            Some(entry) => {
                *entry = CacheEntry {
                    value: record.value,
                    version: Some(record.version),
                };
                true
            }
            None => {
                entries.insert(
                    record.name.clone(),
                    CacheEntry {
                        value: record.value,
                        version: Some(record.version),
                    },
                );
                true
            }
        }
    }

    /// Warm from the store. Only counters are restored; returns how many.
    pub fn load_all<'a>(&self, records: impl IntoIterator<Item = &'a MetricRecord>) -> usize {
        let mut loaded = 0;
        for record in records {
            if record.kind == MetricKind::Counter && self.observe(record) {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Point-in-time copy, ordered by name
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.entries
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value))
            .collect()
    }
}

//! Metric Record Store
//!
//! Keyed persistence of `MetricRecord`s behind the `MetricStore` trait.
//! Every mutating method is a single atomic statement against the store:
//! callers never read-modify-write across two calls to get correctness.
//!
//! Implementations:
//! - `InMemoryMetricStore`: tests and DST
//! - `JournalMetricStore`: durable, journal-backed
//! - `SimulatedMetricStore`: fault-injecting wrapper for DST

pub mod journal;
pub mod memory;
pub mod simulated;

pub use journal::JournalMetricStore;
pub use memory::InMemoryMetricStore;
pub use simulated::{SimulatedMetricStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::metrics::{MetricKind, MetricRecord, NewMetricRecord};
use std::collections::HashMap;
use std::io::Error as IoError;
use std::sync::Arc;

/// Error type for store operations
#[derive(Debug)]
pub enum StoreError {
    /// Store cannot be reached or refused the connection
    Unavailable(String),
    /// A record with this name already exists
    UniqueViolation(String),
    /// Mutation would overflow the stored value; nothing was written
    Overflow { name: String },
    /// I/O error
    Io(IoError),
    /// Persisted data failed validation
    Corruption(String),
}

impl StoreError {
    /// Whether a later retry of the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::UniqueViolation(name) => {
                write!(f, "Unique constraint violated for metric: {}", name)
            }
            StoreError::Overflow { name } => write!(f, "Value overflow for metric: {}", name),
            StoreError::Io(e) => write!(f, "Store I/O error: {}", e),
            StoreError::Corruption(msg) => write!(f, "Store corruption: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        StoreError::Io(e)
    }
}

/// Result of a versioned compare-and-swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// Version matched; the new record image
    Swapped(MetricRecord),
    /// Someone else updated the record first
    VersionMismatch { current: u64 },
    /// No record with this name
    Missing,
}

/// Metric store abstraction
///
/// The `*_if_exists` methods return `Ok(None)` when no row matched
/// ("zero rows affected") and the new record image otherwise.
pub trait MetricStore: Send + Sync + 'static {
    fn get(&self, name: &str) -> Result<Option<MetricRecord>, StoreError>;

    /// Create a record at version 0. Fails with `UniqueViolation` if the name exists.
    fn insert(&self, record: NewMetricRecord) -> Result<MetricRecord, StoreError>;

    /// `value = value + 1` on an existing row
    fn increment_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError>;

    /// `value = :value` on an existing row
    fn set_if_exists(&self, name: &str, value: i64) -> Result<Option<MetricRecord>, StoreError>;

    /// `value = 0` on an existing row
    fn reset_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError>;

    /// Overwrite the value only if the row is still at `expected_version`
    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
    ) -> Result<CasOutcome, StoreError>;

    /// Records of one kind, ordered by name
    fn list_by_kind(&self, kind: MetricKind) -> Result<Vec<MetricRecord>, StoreError>;

    /// Every record, ordered by name
    fn list_all(&self) -> Result<Vec<MetricRecord>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Cheap connectivity probe
    fn ping(&self) -> Result<(), StoreError> {
        self.count().map(|_| ())
    }
}

impl<S: MetricStore> MetricStore for Arc<S> {
    fn get(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        (**self).get(name)
    }

    fn insert(&self, record: NewMetricRecord) -> Result<MetricRecord, StoreError> {
        (**self).insert(record)
    }

    fn increment_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        (**self).increment_if_exists(name)
    }

    fn set_if_exists(&self, name: &str, value: i64) -> Result<Option<MetricRecord>, StoreError> {
        (**self).set_if_exists(name, value)
    }

    fn reset_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        (**self).reset_if_exists(name)
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
    ) -> Result<CasOutcome, StoreError> {
        (**self).compare_and_swap(name, expected_version, value)
    }

    fn list_by_kind(&self, kind: MetricKind) -> Result<Vec<MetricRecord>, StoreError> {
        (**self).list_by_kind(kind)
    }

    fn list_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        (**self).list_all()
    }

    fn count(&self) -> Result<usize, StoreError> {
        (**self).count()
    }

    fn ping(&self) -> Result<(), StoreError> {
        (**self).ping()
    }
}

// ============================================================================
// MetricTable - row storage shared by the concrete stores
// ============================================================================

/// Row storage with a plan/commit split.
///
/// `plan_*` computes the next record image without touching the table;
/// `commit` installs it. Stores hold their write lock across both so the
/// pair is atomic, and the journal store appends the image in between.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    rows: HashMap<String, MetricRecord>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MetricRecord> {
        self.rows.get(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn plan_insert(&self, new: NewMetricRecord, now_ms: u64) -> Result<MetricRecord, StoreError> {
        if self.rows.contains_key(&new.name) {
            return Err(StoreError::UniqueViolation(new.name));
        }
        Ok(MetricRecord {
            name: new.name,
            value: new.value,
            kind: new.kind,
            description: new.description,
            last_updated_ms: now_ms,
            version: 0,
        })
    }

    pub fn plan_increment(&self, name: &str, now_ms: u64) -> Result<Option<MetricRecord>, StoreError> {
        let Some(current) = self.rows.get(name) else {
            return Ok(None);
        };
        let value = current.value.checked_add(1).ok_or_else(|| StoreError::Overflow {
            name: name.to_string(),
        })?;
        Ok(Some(Self::bump(current, value, now_ms)))
    }

    pub fn plan_set(&self, name: &str, value: i64, now_ms: u64) -> Option<MetricRecord> {
        self.rows
            .get(name)
            .map(|current| Self::bump(current, value, now_ms))
    }

    pub fn plan_compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
        now_ms: u64,
    ) -> CasOutcome {
        match self.rows.get(name) {
            None => CasOutcome::Missing,
            Some(current) if current.version != expected_version => CasOutcome::VersionMismatch {
                current: current.version,
            },
            Some(current) => CasOutcome::Swapped(Self::bump(current, value, now_ms)),
        }
    }

    /// Install a planned record image
    pub fn commit(&mut self, record: MetricRecord) {
        debug_assert!(
            self.rows
                .get(&record.name)
                .map_or(true, |current| record.version > current.version),
            "Invariant violated: version must grow on every mutation of {}",
            record.name
        );
        self.rows.insert(record.name.clone(), record);
    }

    /// Install a replayed image; older images for the same name are ignored
    pub fn commit_replayed(&mut self, record: MetricRecord) {
        let newer = self
            .rows
            .get(&record.name)
            .map_or(true, |current| record.version >= current.version);
        if newer {
            self.rows.insert(record.name.clone(), record);
        }
    }

    /// Records ordered by name, optionally filtered by kind
    pub fn list(&self, kind: Option<MetricKind>) -> Vec<MetricRecord> {
        let mut records: Vec<MetricRecord> = self
            .rows
            .values()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    fn bump(current: &MetricRecord, value: i64, now_ms: u64) -> MetricRecord {
        MetricRecord {
            value,
            last_updated_ms: now_ms.max(current.last_updated_ms),
            version: current.version.saturating_add(1),
            ..current.clone()
        }
    }
}

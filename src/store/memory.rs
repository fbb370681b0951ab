//! In-memory metric store for unit tests and deterministic simulation

use super::{CasOutcome, MetricStore, MetricTable, StoreError};
use crate::clock::{MetricClock, ProductionClock};
use crate::metrics::{MetricKind, MetricRecord, NewMetricRecord};
use parking_lot::RwLock;
use std::sync::Arc;

/// Clones share the same table
#[derive(Clone)]
pub struct InMemoryMetricStore {
    table: Arc<RwLock<MetricTable>>,
    clock: Arc<dyn MetricClock>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(ProductionClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn MetricClock>) -> Self {
        InMemoryMetricStore {
            table: Arc::new(RwLock::new(MetricTable::new())),
            clock,
        }
    }

    /// Seed a store with existing records, e.g. to model a restart
    pub fn with_records(records: impl IntoIterator<Item = MetricRecord>) -> Self {
        let store = Self::new();
        {
            let mut table = store.table.write();
            for record in records {
                table.commit_replayed(record);
            }
        }
        store
    }

    /// Number of stored records (for testing)
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Plan and commit under one write lock
    fn mutate(
        &self,
        plan: impl FnOnce(&MetricTable, u64) -> Result<Option<MetricRecord>, StoreError>,
    ) -> Result<Option<MetricRecord>, StoreError> {
        let mut table = self.table.write();
        let planned = plan(&table, self.clock.now_ms())?;
        if let Some(record) = &planned {
            table.commit(record.clone());
        }
        Ok(planned)
    }
}

impl Default for InMemoryMetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetricStore")
            .field("records", &self.len())
            .finish()
    }
}

impl MetricStore for InMemoryMetricStore {
    fn get(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        Ok(self.table.read().get(name).cloned())
    }

    fn insert(&self, record: NewMetricRecord) -> Result<MetricRecord, StoreError> {
        let mut table = self.table.write();
        let created = table.plan_insert(record, self.clock.now_ms())?;
        table.commit(created.clone());
        Ok(created)
    }

    fn increment_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.mutate(|table, now| table.plan_increment(name, now))
    }

    fn set_if_exists(&self, name: &str, value: i64) -> Result<Option<MetricRecord>, StoreError> {
        self.mutate(|table, now| Ok(table.plan_set(name, value, now)))
    }

    fn reset_if_exists(&self, name: &str) -> Result<Option<MetricRecord>, StoreError> {
        self.mutate(|table, now| Ok(table.plan_set(name, 0, now)))
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected_version: u64,
        value: i64,
    ) -> Result<CasOutcome, StoreError> {
        let mut table = self.table.write();
        let outcome = table.plan_compare_and_swap(name, expected_version, value, self.clock.now_ms());
        if let CasOutcome::Swapped(record) = &outcome {
            table.commit(record.clone());
        }
        Ok(outcome)
    }

    fn list_by_kind(&self, kind: MetricKind) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self.table.read().list(Some(kind)))
    }

    fn list_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self.table.read().list(None))
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.table.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    fn store() -> (InMemoryMetricStore, SimulatedClock) {
        let clock = SimulatedClock::new(1_000);
        (InMemoryMetricStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_insert_then_increment() {
        let (store, clock) = store();
        let created = store
            .insert(NewMetricRecord::new("library.errors.total", 1, MetricKind::Counter))
            .unwrap();
        assert_eq!(created.version, 0);
        assert_eq!(created.last_updated_ms, 1_000);

        clock.advance_ms(5);
        let updated = store.increment_if_exists("library.errors.total").unwrap().unwrap();
        assert_eq!(updated.value, 2);
        assert_eq!(updated.version, 1);
        assert_eq!(updated.last_updated_ms, 1_005);
    }

    #[test]
    fn test_conditional_updates_on_missing_row() {
        let (store, _) = store();
        assert_eq!(store.increment_if_exists("missing").unwrap(), None);
        assert_eq!(store.set_if_exists("missing", 3).unwrap(), None);
        assert_eq!(store.reset_if_exists("missing").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reset_keeps_record() {
        let (store, _) = store();
        store
            .insert(NewMetricRecord::new("c", 40, MetricKind::Counter))
            .unwrap();
        let reset = store.reset_if_exists("c").unwrap().unwrap();
        assert_eq!(reset.value, 0);
        assert_eq!(reset.version, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (store, _) = store();
        store.insert(NewMetricRecord::new("d", 1, MetricKind::Counter)).unwrap();
        let err = store
            .insert(NewMetricRecord::new("d", 1, MetricKind::Counter))
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        assert_eq!(store.get("d").unwrap().unwrap().value, 1);
    }

    #[test]
    fn test_compare_and_swap_detects_lost_update() {
        let (store, _) = store();
        store.insert(NewMetricRecord::new("v", 10, MetricKind::Gauge)).unwrap();

        // Two writers read version 0; only the first swap wins
        assert!(matches!(
            store.compare_and_swap("v", 0, 11).unwrap(),
            CasOutcome::Swapped(ref r) if r.value == 11 && r.version == 1
        ));
        assert_eq!(
            store.compare_and_swap("v", 0, 12).unwrap(),
            CasOutcome::VersionMismatch { current: 1 }
        );
        assert_eq!(store.get("v").unwrap().unwrap().value, 11);
    }

    #[test]
    fn test_concurrent_increments_serialize() {
        let (store, _) = store();
        store.insert(NewMetricRecord::new("hot", 0, MetricKind::Counter)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.increment_if_exists("hot").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let record = store.get("hot").unwrap().unwrap();
        assert_eq!(record.value, 2_000);
        assert_eq!(record.version, 2_000);
    }

    #[test]
    fn test_with_records_and_ping() {
        let seeded = InMemoryMetricStore::with_records(vec![MetricRecord {
            name: "restored".to_string(),
            value: 7,
            kind: MetricKind::Counter,
            description: None,
            last_updated_ms: 1,
            version: 3,
        }]);
        assert!(seeded.ping().is_ok());
        assert_eq!(seeded.list_by_kind(MetricKind::Counter).unwrap().len(), 1);
        assert!(seeded.list_by_kind(MetricKind::Gauge).unwrap().is_empty());
    }
}

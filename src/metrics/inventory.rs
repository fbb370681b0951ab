//! Store inventory dump, logged at startup and shutdown

use super::{MetricKind, MetricRecord};
use crate::store::{MetricStore, StoreError};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub records: Vec<MetricRecord>,
}

impl Inventory {
    pub fn collect<S: MetricStore>(store: &S) -> Result<Self, StoreError> {
        Ok(Inventory {
            records: store.list_all()?,
        })
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn count_of(&self, kind: MetricKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// One line per record, ordered by name
    pub fn lines(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| {
                format!(
                    "{} = {} ({}, v{}, updated {})",
                    r.name, r.value, r.kind, r.version, r.last_updated_ms
                )
            })
            .collect()
    }

    pub fn log(&self, label: &str) {
        info!(
            "{}: {} metrics in store ({} counters, {} gauges)",
            label,
            self.total(),
            self.count_of(MetricKind::Counter),
            self.count_of(MetricKind::Gauge)
        );
        for line in self.lines() {
            info!("  {}", line);
        }
    }
}

/// Collect and log the store contents
pub fn log_inventory<S: MetricStore>(store: &S, label: &str) -> Result<Inventory, StoreError> {
    let inventory = Inventory::collect(store)?;
    inventory.log(label);
    Ok(inventory)
}

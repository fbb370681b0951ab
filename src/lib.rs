pub mod buggify;
pub mod clock;
pub mod config;
pub mod io;
pub mod metrics;
pub mod observability;
pub mod store;
pub mod transport;

// stateright is a dev-dependency
#[cfg(test)]
pub mod stateright;

pub use config::{AggregatorConfig, ConfigError};
pub use metrics::{
    AckDecision, AggregateOutcome, Aggregator, ConsumerAdapter, IncrementStrategy, MetricCache,
    MetricEvent, MetricKind, MetricOperation, MetricRecord,
};
pub use store::{InMemoryMetricStore, JournalMetricStore, MetricStore, StoreError};
pub use transport::{PartitionedTransport, TransportError};

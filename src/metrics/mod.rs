//! Metric Event Aggregation
//!
//! Consumes metric mutation events (increment / set / reset a named counter
//! or gauge) and converges them into the store under at-least-once delivery:
//!
//! ```text
//! transport ─▶ ConsumerAdapter ─▶ validator ─▶ Aggregator ─▶ MetricStore (durable)
//!                     ▲                              └──────▶ MetricCache (volatile mirror)
//!                     └──────── AckDecision ◀────────┘
//! ```

pub mod aggregator;
pub mod cache;
pub mod consumer;
pub mod dst;
pub mod inventory;
mod types;
pub mod validator;

pub use aggregator::{
    AggregateError, AggregateOutcome, Aggregator, AppliedMutation, IncrementStrategy, SkipReason,
};
pub use cache::MetricCache;
pub use consumer::{AckDecision, ConsumerAdapter, ConsumerError, ConsumerStatsSnapshot};
pub use inventory::{log_inventory, Inventory};
pub use types::{MetricEvent, MetricKind, MetricOperation, MetricRecord, NewMetricRecord};
pub use validator::{validate, Rejection};

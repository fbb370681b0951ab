//! Core metric types for the aggregation service

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kind of metric being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricKind {
    /// Conventionally only increased or reset
    /// Use for: error counts, failed calls, duplicate attempts
    #[default]
    Counter,

    /// Point-in-time value, set directly
    /// Use for: cache size, queue depth
    Gauge,
}

impl MetricKind {
    /// Name as stored and sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "COUNTER",
            MetricKind::Gauge => "GAUGE",
        }
    }

    /// Parse a kind name, ignoring case and surrounding whitespace
    pub fn parse(s: &str) -> Option<MetricKind> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COUNTER" => Some(MetricKind::Counter),
            "GAUGE" => Some(MetricKind::Gauge),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation requested by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricOperation {
    /// Add one to the persisted value, creating the record at 1
    Increment,
    /// Overwrite the persisted value, creating the record if needed
    Set,
    /// Zero an existing record; no-op when absent
    Reset,
}

impl MetricOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricOperation::Increment => "INCREMENT",
            MetricOperation::Set => "SET",
            MetricOperation::Reset => "RESET",
        }
    }

    /// Parse an operation name, ignoring case and surrounding whitespace
    pub fn parse(s: &str) -> Option<MetricOperation> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INCREMENT" => Some(MetricOperation::Increment),
            "SET" => Some(MetricOperation::Set),
            "RESET" => Some(MetricOperation::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for MetricOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric mutation event as delivered by the transport.
///
/// Field names follow the producer's JSON wire format. Absent and `null`
/// fields decode to their defaults, so a malformed event reaches the
/// validator instead of failing decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    #[serde(rename = "metricName", default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(rename = "metricValue", default)]
    pub value: Option<i64>,

    #[serde(rename = "metricType", default, deserialize_with = "null_as_default")]
    pub kind: MetricKind,

    /// Raw operation name; parsed by the aggregator
    #[serde(default, deserialize_with = "null_as_default")]
    pub operation: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Emission time (Unix ms)
    #[serde(rename = "timestamp", default, deserialize_with = "null_as_default")]
    pub emitted_at_ms: u64,

    #[serde(rename = "eventId", default, deserialize_with = "null_as_default")]
    pub event_id: String,
}

impl MetricEvent {
    /// Create an event with a fresh event id and the current time
    pub fn new(
        name: impl Into<String>,
        value: Option<i64>,
        kind: MetricKind,
        operation: MetricOperation,
    ) -> Self {
        MetricEvent {
            name: name.into(),
            value,
            kind,
            operation: operation.as_str().to_string(),
            description: None,
            emitted_at_ms: now_ms(),
            event_id: new_event_id(),
        }
    }

    /// Counter increment. The value is advisory only.
    pub fn increment(name: impl Into<String>) -> Self {
        Self::new(name, Some(1), MetricKind::Counter, MetricOperation::Increment)
    }

    /// Overwrite with `value`
    pub fn set(name: impl Into<String>, value: i64, kind: MetricKind) -> Self {
        Self::new(name, Some(value), kind, MetricOperation::Set)
    }

    pub fn reset(name: impl Into<String>) -> Self {
        Self::new(name, Some(0), MetricKind::Counter, MetricOperation::Reset)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Parsed operation, if recognised
    pub fn parsed_operation(&self) -> Option<MetricOperation> {
        MetricOperation::parse(&self.operation)
    }
}

/// Durable state of one metric, keyed uniquely by `name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: i64,
    pub kind: MetricKind,
    pub description: Option<String>,
    /// Last accepted mutation (Unix ms)
    pub last_updated_ms: u64,
    /// Starts at 0 on insert and grows by one on every accepted mutation
    pub version: u64,
}

/// Fields supplied when creating a record; the store stamps time and version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMetricRecord {
    pub name: String,
    pub value: i64,
    pub kind: MetricKind,
    pub description: Option<String>,
}

impl NewMetricRecord {
    pub fn new(name: impl Into<String>, value: i64, kind: MetricKind) -> Self {
        NewMetricRecord {
            name: name.into(),
            value,
            kind,
            description: None,
        }
    }

    /// Build the creation record for an event
    pub fn from_event(event: &MetricEvent, value: i64) -> Self {
        NewMetricRecord {
            name: event.name.clone(),
            value,
            kind: event.kind,
            description: event.description.clone(),
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Random 128-bit id rendered as 32 hex chars
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn new_event_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.next_u64(), rng.next_u64())
}

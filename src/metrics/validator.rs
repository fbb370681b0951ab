//! Event validation
//!
//! An event is accepted when it names a metric, names an operation and
//! carries a value. Rejection is permanent: the event is acknowledged and
//! dropped, since redelivering it cannot make it valid.

use super::types::MetricEvent;

/// Why an event was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyName,
    EmptyOperation,
    MissingValue,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::EmptyName => write!(f, "null or empty metric name"),
            Rejection::EmptyOperation => write!(f, "null or empty operation"),
            Rejection::MissingValue => write!(f, "null metric value"),
        }
    }
}

/// Check required fields, reporting the first missing one
pub fn check(event: &MetricEvent) -> Result<(), Rejection> {
    if event.name.trim().is_empty() {
        return Err(Rejection::EmptyName);
    }
    if event.operation.trim().is_empty() {
        return Err(Rejection::EmptyOperation);
    }
    if event.value.is_none() {
        return Err(Rejection::MissingValue);
    }
    Ok(())
}

/// Pure predicate over the event's required fields
#[inline]
pub fn validate(event: &MetricEvent) -> bool {
    check(event).is_ok()
}

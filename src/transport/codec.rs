//! JSON wire codec for metric events
//!
//! `{"metricName", "metricValue", "metricType", "operation", "description",
//! "timestamp", "eventId"}`, one object per message.

use super::TransportError;
use crate::metrics::MetricEvent;
use serde::Deserialize;

pub fn encode(event: &MetricEvent) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(event).map_err(TransportError::Encode)
}

pub fn decode(payload: &[u8]) -> Result<MetricEvent, TransportError> {
    serde_json::from_slice(payload).map_err(TransportError::Decode)
}

#[derive(Deserialize)]
struct RoutingKey {
    #[serde(rename = "metricName", default)]
    name: String,
}

/// Metric name of a payload, used for partition routing.
///
/// Only the key is parsed; `None` if the payload is not a JSON object.
pub fn routing_key(payload: &[u8]) -> Option<String> {
    serde_json::from_slice::<RoutingKey>(payload)
        .ok()
        .map(|k| k.name)
}

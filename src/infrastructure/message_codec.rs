// Decoding of real-time stream messages
use crate::domain::sample::Sample;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed stream message: {0}")]
pub struct MalformedMessage(pub String);

/// `{type, event, data, timestamp, collector_id, user_id}` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub collector_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PowerDataPayload {
    #[serde(default)]
    collector_id: Option<String>,
    #[serde(default)]
    collector_name: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    voltage: f64,
    #[serde(default)]
    current: f64,
    #[serde(default)]
    power: f64,
    #[serde(default)]
    energy: f64,
    #[serde(default)]
    frequency: f64,
    #[serde(default)]
    power_factor: f64,
}

#[derive(Debug, Deserialize)]
struct CollectorStatusPayload {
    collector_id: String,
    online: bool,
}

pub fn decode_envelope(text: &str) -> Result<StreamEnvelope, MalformedMessage> {
    serde_json::from_str(text).map_err(|e| MalformedMessage(e.to_string()))
}

/// Build a `Sample` from a `power_data` payload.
///
/// The payload's own collector id wins over the envelope's. A missing
/// timestamp is replaced by `received_at`.
pub fn decode_power_data(
    envelope: &StreamEnvelope,
    received_at: DateTime<Utc>,
) -> Result<Sample, MalformedMessage> {
    if !envelope.data.is_object() {
        return Err(MalformedMessage("power_data payload is not an object".to_string()));
    }

    let payload: PowerDataPayload =
        serde_json::from_value(envelope.data.clone()).map_err(|e| MalformedMessage(e.to_string()))?;

    let collector_id = payload
        .collector_id
        .or_else(|| envelope.collector_id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| MalformedMessage("power_data without collector_id".to_string()))?;

    let timestamp = match payload.timestamp.as_deref().filter(|t| !t.is_empty()) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| MalformedMessage(format!("invalid timestamp {raw:?}: {e}")))?,
        None => received_at,
    };

    let values = [
        payload.voltage,
        payload.current,
        payload.power,
        payload.energy,
        payload.frequency,
        payload.power_factor,
    ];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(MalformedMessage("power_data contains non-finite values".to_string()));
    }

    Ok(Sample {
        collector_id,
        collector_name: payload.collector_name,
        timestamp: Some(timestamp),
        voltage: payload.voltage,
        current: payload.current,
        power: payload.power,
        energy: payload.energy,
        frequency: payload.frequency,
        power_factor: payload.power_factor,
    })
}

/// `(collector_id, online)` from a `collector_status` payload.
pub fn decode_collector_status(envelope: &StreamEnvelope) -> Result<(String, bool), MalformedMessage> {
    let payload: CollectorStatusPayload =
        serde_json::from_value(envelope.data.clone()).map_err(|e| MalformedMessage(e.to_string()))?;
    Ok((payload.collector_id, payload.online))
}

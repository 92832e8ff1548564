use super::{arrival_timestamp, LiveEvent, Sample, TRACKED_METRICS};
use serde_json::Value;
use std::fmt;

/// Reasons a live payload is rejected as malformed
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    InvalidJson(String),
    NotAnObject,
    MissingField(&'static str),
    WrongType { field: String, expected: &'static str },
    EmptyId,
    NonFiniteValue(String),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::InvalidJson(e) => write!(f, "payload is not valid JSON: {}", e),
            PayloadError::NotAnObject => write!(f, "payload must be a JSON object"),
            PayloadError::MissingField(field) => write!(f, "'{}' is required", field),
            PayloadError::WrongType { field, expected } => {
                write!(f, "'{}' must be {}", field, expected)
            }
            PayloadError::EmptyId => write!(f, "'id' must not be empty"),
            PayloadError::NonFiniteValue(field) => {
                write!(f, "'{}' must be a finite number", field)
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Parses a raw live payload into a [`LiveEvent`].
///
/// Rules:
/// - Payload must be a JSON object
/// - `id`: non-blank string, kept exactly as sent
/// - `temperature`, `distance`: numbers (integers accepted)
/// - `timestamp`: optional string or integer; arrival time when absent or null
///
/// Unknown fields are ignored.
pub fn parse_live_event(raw: &str) -> Result<LiveEvent, PayloadError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;

    let object = value.as_object().ok_or(PayloadError::NotAnObject)?;

    let entity_id = match object.get("id") {
        None | Some(Value::Null) => return Err(PayloadError::MissingField("id")),
        Some(Value::String(id)) => id.clone(),
        Some(_) => {
            return Err(PayloadError::WrongType {
                field: "id".to_string(),
                expected: "a string",
            })
        }
    };
    // Ids are join keys and kept verbatim; blank ones carry no identity
    if entity_id.trim().is_empty() {
        return Err(PayloadError::EmptyId);
    }

    let (timestamp, synthesized_timestamp) = match object.get("timestamp") {
        None | Some(Value::Null) => (arrival_timestamp(), true),
        Some(Value::String(ts)) if !ts.is_empty() => (ts.clone(), false),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => (n.to_string(), false),
        Some(_) => {
            return Err(PayloadError::WrongType {
                field: "timestamp".to_string(),
                expected: "a non-empty string or an integer",
            })
        }
    };

    let mut sample = Sample::new(timestamp);
    for metric in TRACKED_METRICS {
        let value = match object.get(metric) {
            None | Some(Value::Null) => return Err(PayloadError::MissingField(metric)),
            Some(v) => v.as_f64().ok_or_else(|| PayloadError::WrongType {
                field: metric.to_string(),
                expected: "a number",
            })?,
        };
        if !value.is_finite() {
            return Err(PayloadError::NonFiniteValue(metric.to_string()));
        }
        sample.values.insert(metric.to_string(), value);
    }

    Ok(LiveEvent {
        entity_id,
        sample,
        synthesized_timestamp,
    })
}

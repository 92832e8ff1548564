use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod validation;

pub use validation::{parse_live_event, PayloadError};

/// Metric name for body temperature readings (°C)
pub const TEMPERATURE: &str = "temperature";

/// Metric name for distance readings (m)
pub const DISTANCE: &str = "distance";

/// Metrics carried by every live event and history point
pub const TRACKED_METRICS: [&str; 2] = [TEMPERATURE, DISTANCE];

/// One observation for one entity.
///
/// Timestamps are opaque strings: the history API sends its own format,
/// live events may carry an ordinal, and synthesized timestamps are RFC 3339.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: String,
    pub values: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style helper for attaching a metric value
    pub fn with_value(mut self, metric: &str, value: f64) -> Self {
        self.values.insert(metric.to_string(), value);
        self
    }

    /// Value recorded for `metric`, if this sample carries it
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// A parsed live event addressed to one entity
#[derive(Clone, Debug, PartialEq)]
pub struct LiveEvent {
    pub entity_id: String,
    pub sample: Sample,
    /// True when the payload had no timestamp and arrival time was used
    pub synthesized_timestamp: bool,
}

/// Arrival-time proxy used when a live payload carries no timestamp
pub fn arrival_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

//! Record - Dispatcher output, Sink input
//!
//! One persisted point: series, tags, fields, timestamp and precision.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measured value stored in a record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Timestamp precision a record is stored at
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Precision {
    /// Whole seconds
    #[default]
    #[serde(rename = "s")]
    Second,
    /// Nanoseconds
    #[serde(rename = "ns")]
    Nanosecond,
}

impl Precision {
    /// Short unit name ("s" / "ns")
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Nanosecond => "ns",
        }
    }
}

/// Persisted point handed to sinks
///
/// Built fresh per received message and never mutated after handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Series name (the subscription pattern)
    pub series: String,

    /// String metadata used for indexing/grouping
    pub tags: BTreeMap<String, String>,

    /// Measured values
    pub fields: BTreeMap<String, FieldValue>,

    /// Point time (UTC)
    pub timestamp: DateTime<Utc>,

    /// Storage precision for `timestamp`
    pub precision: Precision,
}

impl Record {
    /// Timestamp expressed as an integer count of `precision` units since the epoch
    pub fn epoch_time(&self) -> i64 {
        match self.precision {
            Precision::Second => self.timestamp.timestamp(),
            Precision::Nanosecond => self
                .timestamp
                .timestamp_nanos_opt()
                .unwrap_or_else(|| self.timestamp.timestamp().saturating_mul(1_000_000_000)),
        }
    }

    /// Whether the record has at least one field
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(precision: Precision) -> Record {
        Record {
            series: "a/+".to_string(),
            tags: BTreeMap::new(),
            fields: BTreeMap::from([("value".to_string(), FieldValue::Integer(1))]),
            timestamp: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            precision,
        }
    }

    #[test]
    fn test_epoch_time_follows_precision() {
        assert_eq!(record(Precision::Second).epoch_time(), 1_700_000_000);
        assert_eq!(
            record(Precision::Nanosecond).epoch_time(),
            1_700_000_000_123_456_789
        );
    }

    #[test]
    fn test_field_value_json_is_untagged() {
        let rec = record(Precision::Second);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["fields"]["value"], serde_json::json!(1));
        assert_eq!(json["precision"], serde_json::json!("s"));
    }
}

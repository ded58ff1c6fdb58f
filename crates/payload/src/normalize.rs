//! Payload normalization
//!
//! Objects are split into fields and tags and may carry their own timestamp.
//! Every other kind becomes a single scalar stored under [`SCALAR_KEY`].

use std::collections::BTreeMap;

use contracts::FieldValue;
use serde_json::{Map, Value};
use tracing::trace;

use crate::classify::{classify, PayloadKind};
use crate::error::{NormalizeError, Result};
use crate::timestamp::{parse_legacy, parse_rfc3339, Timestamp, TIMESTAMP_FIELDS};

/// Object keys starting with this marker become tags
pub const TAG_MARKER: char = '_';

/// Field key used for scalar payloads
pub const SCALAR_KEY: &str = "value";

/// Single typed value of a non-object payload
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
}

impl ScalarValue {
    /// Field representation; timestamps are rendered as RFC 3339 text
    pub fn to_field_value(&self) -> FieldValue {
        match self {
            Self::Integer(v) => FieldValue::Integer(*v),
            Self::Float(v) => FieldValue::Float(*v),
            Self::Text(v) => FieldValue::Text(v.clone()),
            Self::Timestamp(ts) => FieldValue::Text(ts.to_rfc3339()),
        }
    }
}

/// Payload reshaped into a typed value
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedPayload {
    /// Structured object
    Object {
        /// Measured values
        fields: BTreeMap<String, FieldValue>,
        /// Lifted `_`-prefixed keys, marker stripped
        tags: BTreeMap<String, String>,
        /// Record time taken from a well-known field
        timestamp: Option<Timestamp>,
    },
    /// Single value
    Scalar {
        /// The value
        value: ScalarValue,
    },
}

impl NormalizedPayload {
    /// Field map; scalars are keyed by [`SCALAR_KEY`]
    pub fn fields(&self) -> BTreeMap<String, FieldValue> {
        match self {
            Self::Object { fields, .. } => fields.clone(),
            Self::Scalar { value } => {
                BTreeMap::from([(SCALAR_KEY.to_string(), value.to_field_value())])
            }
        }
    }

    /// Lifted tags (always empty for scalars)
    pub fn tags(&self) -> BTreeMap<String, String> {
        match self {
            Self::Object { tags, .. } => tags.clone(),
            Self::Scalar { .. } => BTreeMap::new(),
        }
    }

    /// Timestamp override found in an object payload
    pub fn timestamp(&self) -> Option<&Timestamp> {
        match self {
            Self::Object { timestamp, .. } => timestamp.as_ref(),
            Self::Scalar { .. } => None,
        }
    }
}

/// Normalize `raw` according to an already computed `kind`
///
/// # Errors
/// [`NormalizeError::MalformedObject`] when an object-kind payload does not parse
/// as a JSON object. Other kinds never fail; a value that does not fit its kind
/// falls back to text.
pub fn normalize(raw: &[u8], kind: PayloadKind) -> Result<NormalizedPayload> {
    let trimmed = raw.trim_ascii();

    let value = match kind {
        PayloadKind::Object => return normalize_object(trimmed),
        PayloadKind::Numeric => parse_number(trimmed),
        PayloadKind::LegacyTimestamp => as_text(trimmed)
            .and_then(parse_legacy)
            .map(ScalarValue::Timestamp),
        PayloadKind::IsoTimestamp => as_text(trimmed)
            .and_then(parse_rfc3339)
            .map(ScalarValue::Timestamp),
        PayloadKind::String => None,
    }
    .unwrap_or_else(|| ScalarValue::Text(String::from_utf8_lossy(trimmed).into_owned()));

    trace!(kind = %kind, value = ?value, "normalized scalar payload");
    Ok(NormalizedPayload::Scalar { value })
}

/// Classify then normalize
pub fn normalize_bytes(raw: &[u8]) -> Result<(PayloadKind, NormalizedPayload)> {
    let kind = classify(raw);
    normalize(raw, kind).map(|normalized| (kind, normalized))
}

fn as_text(raw: &[u8]) -> Option<&str> {
    std::str::from_utf8(raw).ok()
}

fn parse_number(raw: &[u8]) -> Option<ScalarValue> {
    let text = as_text(raw)?;
    if !text.contains('.') {
        if let Ok(v) = text.parse::<i64>() {
            return Some(ScalarValue::Integer(v));
        }
    }
    text.parse::<f64>().ok().map(ScalarValue::Float)
}

fn normalize_object(raw: &[u8]) -> Result<NormalizedPayload> {
    let object: Map<String, Value> =
        serde_json::from_slice(raw).map_err(|e| NormalizeError::MalformedObject {
            message: e.to_string(),
        })?;

    let mut fields = BTreeMap::new();
    let mut tags = BTreeMap::new();

    // Tags are lifted first so a marked key is never taken for the timestamp
    for (key, value) in object {
        match key.strip_prefix(TAG_MARKER) {
            Some(tag) if !tag.is_empty() => {
                if let Some(text) = tag_text(value) {
                    tags.insert(tag.to_string(), text);
                }
            }
            _ => {
                if let Some(field) = field_value(value) {
                    fields.insert(key, field);
                }
            }
        }
    }

    let timestamp = take_timestamp_field(&mut fields);

    trace!(
        fields = fields.len(),
        tags = tags.len(),
        has_timestamp = timestamp.is_some(),
        "normalized object payload"
    );

    Ok(NormalizedPayload::Object {
        fields,
        tags,
        timestamp,
    })
}

fn tag_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn field_value(value: Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::Bool(v) => Some(FieldValue::Boolean(v)),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Integer)
            .or_else(|| n.as_f64().map(FieldValue::Float)),
        Value::String(text) => Some(FieldValue::Text(text)),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(FieldValue::Text(nested.to_string())),
    }
}

fn take_timestamp_field(fields: &mut BTreeMap<String, FieldValue>) -> Option<Timestamp> {
    for (name, format) in TIMESTAMP_FIELDS {
        let Some(FieldValue::Text(text)) = fields.get(*name) else {
            continue;
        };
        if let Some(ts) = format.parse(text) {
            fields.remove(*name);
            return Some(ts);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use contracts::Precision;

    fn normalized(raw: &[u8]) -> NormalizedPayload {
        normalize(raw, classify(raw)).unwrap()
    }

    #[test]
    fn test_tag_lifting() {
        let payload = normalized(br#"{"_host": "a", "temp": 21}"#);

        assert_eq!(
            payload.fields(),
            BTreeMap::from([("temp".to_string(), FieldValue::Integer(21))])
        );
        assert_eq!(
            payload.tags(),
            BTreeMap::from([("host".to_string(), "a".to_string())])
        );
        assert!(payload.timestamp().is_none());
    }

    #[test]
    fn test_tag_values_coerced_to_string() {
        let payload = normalized(br#"{"_id": 7, "_ok": true, "_gone": null, "v": 1}"#);
        let tags = payload.tags();
        assert_eq!(tags["id"], "7");
        assert_eq!(tags["ok"], "true");
        assert!(!tags.contains_key("gone"));
    }

    #[test]
    fn test_bare_marker_key_stays_field() {
        let payload = normalized(br#"{"_": 1}"#);
        assert_eq!(payload.fields()["_"], FieldValue::Integer(1));
        assert!(payload.tags().is_empty());
    }

    #[test]
    fn test_object_field_types() {
        let payload = normalized(
            br#"{"i": -3, "f": 2.5, "b": false, "s": "x", "n": null, "arr": [1,2], "big": 18446744073709551615}"#,
        );
        let fields = payload.fields();

        assert_eq!(fields["i"], FieldValue::Integer(-3));
        assert_eq!(fields["f"], FieldValue::Float(2.5));
        assert_eq!(fields["b"], FieldValue::Boolean(false));
        assert_eq!(fields["s"], FieldValue::Text("x".into()));
        assert_eq!(fields["arr"], FieldValue::Text("[1,2]".into()));
        assert!(matches!(fields["big"], FieldValue::Float(_)));
        assert!(!fields.contains_key("n"));
    }

    #[test]
    fn test_timestamp_field_overrides_record_time() {
        let payload = normalized(br#"{"temp": 1, "time": "2024-01-02T03:04:05.250Z"}"#);
        let ts = payload.timestamp().unwrap();

        assert_eq!(ts.precision, Precision::Nanosecond);
        assert_eq!(ts.to_utc().timestamp_subsec_millis(), 250);
        assert!(!payload.fields().contains_key("time"));
    }

    #[test]
    fn test_timestamp_field_priority() {
        let payload = normalized(
            br#"{"date": "2024-01-02 03:04:05+0000", "timestamp": "2030-01-01T00:00:00Z", "v": 1}"#,
        );
        let ts = payload.timestamp().unwrap();

        assert_eq!(ts.to_utc(), Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(ts.precision, Precision::Second);
        // Losing candidate stays an ordinary field
        assert!(payload.fields().contains_key("date"));
    }

    #[test]
    fn test_unparseable_timestamp_field_left_alone() {
        let payload = normalized(br#"{"timestamp": "yesterday", "date": "2024-01-02 03:04:05-0500"}"#);
        let ts = payload.timestamp().unwrap();

        assert_eq!(ts.to_utc(), Utc.with_ymd_and_hms(2024, 1, 2, 8, 4, 5).unwrap());
        assert_eq!(
            payload.fields()["timestamp"],
            FieldValue::Text("yesterday".into())
        );
    }

    #[test]
    fn test_tag_marked_timestamp_is_not_record_time() {
        let payload = normalized(br#"{"_time": "2024-01-02T03:04:05Z", "v": 1}"#);
        assert!(payload.timestamp().is_none());
        assert_eq!(payload.tags()["time"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_numeric_scalars() {
        assert_eq!(
            normalized(b"42").fields()[SCALAR_KEY],
            FieldValue::Integer(42)
        );
        assert_eq!(
            normalized(b"42.5").fields()[SCALAR_KEY],
            FieldValue::Float(42.5)
        );
        assert!(matches!(
            normalized(b"99999999999999999999").fields()[SCALAR_KEY],
            FieldValue::Float(_)
        ));
    }

    #[test]
    fn test_legacy_timestamp_scalar() {
        let payload = normalized(b"2024-01-02 03:04:05-0500");
        let NormalizedPayload::Scalar {
            value: ScalarValue::Timestamp(ts),
        } = &payload
        else {
            panic!("expected timestamp scalar, got {payload:?}");
        };

        assert_eq!(ts.to_utc(), Utc.with_ymd_and_hms(2024, 1, 2, 8, 4, 5).unwrap());
        assert_eq!(
            payload.fields()[SCALAR_KEY],
            FieldValue::Text("2024-01-02T03:04:05-05:00".into())
        );
    }

    #[test]
    fn test_string_scalar() {
        assert_eq!(
            normalized(b"hello world").fields()[SCALAR_KEY],
            FieldValue::Text("hello world".into())
        );
    }

    #[test]
    fn test_malformed_object() {
        let raw = b"{not json}";
        assert_eq!(classify(raw), PayloadKind::Object);
        assert!(matches!(
            normalize(raw, PayloadKind::Object),
            Err(NormalizeError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_mismatched_kind_falls_back_to_text() {
        let payload = normalize(b"abc", PayloadKind::Numeric).unwrap();
        assert_eq!(payload.fields()[SCALAR_KEY], FieldValue::Text("abc".into()));
    }

    #[test]
    fn test_normalize_bytes_reports_kind() {
        let (kind, payload) = normalize_bytes(b"7").unwrap();
        assert_eq!(kind, PayloadKind::Numeric);
        assert_eq!(payload.fields()[SCALAR_KEY], FieldValue::Integer(7));
    }
}

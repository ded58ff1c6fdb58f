//! InfluxDB line protocol encoding
//!
//! `series,tag=v field=1i,other="text" 1700000000`

use std::fmt::Write;

use contracts::{FieldValue, Record};

/// Encode one record as a single line (no trailing newline)
///
/// Empty tag values are omitted. Non-finite floats cannot be represented and are
/// skipped; `None` when no field is left. Line breaks anywhere are written as
/// `\n` / `\r` so a record always stays on one line.
pub fn encode(record: &Record) -> Option<String> {
    let mut line = escape(&record.series, &[',', ' ', '\\']);

    for (key, value) in &record.tags {
        if key.is_empty() || value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape(key, KEY_SPECIAL));
        line.push('=');
        line.push_str(&escape(value, KEY_SPECIAL));
    }

    let mut fields = String::new();
    for (key, value) in &record.fields {
        let Some(encoded) = encode_field(value) else {
            continue;
        };
        if !fields.is_empty() {
            fields.push(',');
        }
        fields.push_str(&escape(key, KEY_SPECIAL));
        fields.push('=');
        fields.push_str(&encoded);
    }

    if fields.is_empty() {
        return None;
    }

    let _ = write!(line, " {} {}", fields, record.epoch_time());
    Some(line)
}

/// Characters escaped in tag keys, tag values and field keys
const KEY_SPECIAL: &[char] = &[',', '=', ' ', '\\'];

fn encode_field(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Integer(v) => Some(format!("{v}i")),
        FieldValue::Float(v) if v.is_finite() => Some(format!("{v}")),
        FieldValue::Float(_) => None,
        FieldValue::Boolean(v) => Some(v.to_string()),
        FieldValue::Text(v) => Some(format!("\"{}\"", escape(v, &['"', '\\']))),
    }
}

fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

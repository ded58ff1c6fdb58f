//! Timestamp formats understood by the normalizer

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use contracts::Precision;

/// Fixed-width layout of broker `$SYS` dates; `0` is a digit, `+` a sign
pub const LEGACY_LAYOUT: &str = "0000-00-00 00:00:00+0000";

const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Wire format of a timestamp field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `YYYY-MM-DD HH:MM:SS±HHHH`
    Legacy,
    /// RFC 3339, with or without fractional seconds
    Rfc3339,
}

/// Object keys that may carry the record time, in priority order
pub const TIMESTAMP_FIELDS: &[(&str, TimestampFormat)] = &[
    ("timestamp", TimestampFormat::Rfc3339),
    ("time", TimestampFormat::Rfc3339),
    ("date", TimestampFormat::Legacy),
];

/// Parsed instant with the precision it was written at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Instant, keeping the original UTC offset
    pub instant: DateTime<FixedOffset>,
    /// Second when no fractional digits were present
    pub precision: Precision,
}

impl Timestamp {
    /// Instant in UTC
    pub fn to_utc(&self) -> DateTime<Utc> {
        self.instant.with_timezone(&Utc)
    }

    /// RFC 3339 rendering at the inferred precision
    pub fn to_rfc3339(&self) -> String {
        let format = match self.precision {
            Precision::Second => SecondsFormat::Secs,
            Precision::Nanosecond => SecondsFormat::AutoSi,
        };
        self.instant.to_rfc3339_opts(format, true)
    }
}

impl TimestampFormat {
    /// Parse `text` in this format
    pub fn parse(self, text: &str) -> Option<Timestamp> {
        match self {
            Self::Legacy => parse_legacy(text),
            Self::Rfc3339 => parse_rfc3339(text),
        }
    }
}

/// Parse the legacy fixed-width layout
pub fn parse_legacy(text: &str) -> Option<Timestamp> {
    if !has_legacy_shape(text) {
        return None;
    }

    let instant = DateTime::parse_from_str(text, LEGACY_FORMAT).ok()?;
    Some(Timestamp {
        instant,
        precision: Precision::Second,
    })
}

/// Parse an RFC 3339 timestamp, inferring precision from fractional seconds
pub fn parse_rfc3339(text: &str) -> Option<Timestamp> {
    let instant = DateTime::parse_from_rfc3339(text).ok()?;
    // '.' only ever appears in the fractional-second part
    let precision = if text.contains('.') {
        Precision::Nanosecond
    } else {
        Precision::Second
    };
    Some(Timestamp { instant, precision })
}

fn has_legacy_shape(text: &str) -> bool {
    text.len() == LEGACY_LAYOUT.len()
        && text
            .bytes()
            .zip(LEGACY_LAYOUT.bytes())
            .all(|(c, layout)| match layout {
                b'0' => c.is_ascii_digit(),
                b'+' => c == b'+' || c == b'-',
                other => c == other,
            })
}

//! Payload classification
//!
//! Kinds are tried in a fixed order and the first hit wins. A bare number is
//! valid JSON too, so the order is part of the contract.

use std::fmt;

use crate::timestamp::{parse_legacy, parse_rfc3339};

/// Semantic kind of a raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// `{...}` structured object
    Object,
    /// Digits with at most one decimal point
    Numeric,
    /// `YYYY-MM-DD HH:MM:SS±HHHH`
    LegacyTimestamp,
    /// RFC 3339
    IsoTimestamp,
    /// Anything else, kept as text
    String,
}

impl PayloadKind {
    /// Lowercase label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Numeric => "numeric",
            Self::LegacyTimestamp => "legacy_timestamp",
            Self::IsoTimestamp => "iso_timestamp",
            Self::String => "string",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify raw payload bytes
///
/// Surrounding ASCII whitespace is ignored.
pub fn classify(raw: &[u8]) -> PayloadKind {
    let trimmed = raw.trim_ascii();

    if looks_like_object(trimmed) {
        return PayloadKind::Object;
    }

    if is_numeric(trimmed) {
        return PayloadKind::Numeric;
    }

    let Ok(text) = std::str::from_utf8(trimmed) else {
        return PayloadKind::String;
    };

    if parse_legacy(text).is_some() {
        PayloadKind::LegacyTimestamp
    } else if parse_rfc3339(text).is_some() {
        PayloadKind::IsoTimestamp
    } else {
        PayloadKind::String
    }
}

fn looks_like_object(raw: &[u8]) -> bool {
    raw.first() == Some(&b'{') && raw.last() == Some(&b'}')
}

fn is_numeric(raw: &[u8]) -> bool {
    let mut digits = 0usize;
    let mut points = 0usize;

    for &byte in raw {
        match byte {
            b'0'..=b'9' => digits += 1,
            b'.' => points += 1,
            _ => return false,
        }
    }

    digits > 0 && points <= 1
}

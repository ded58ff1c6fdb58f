//! # Payload
//!
//! Payload normalization module.
//!
//! Responsibilities:
//! - Classify raw payload bytes (object / numeric / legacy timestamp / ISO timestamp / string)
//! - Reshape them into a `NormalizedPayload`
//! - Lift `_`-prefixed object keys into tags
//! - Pick the record timestamp out of well-known object fields
//!
//! ## Usage Example
//!
//! ```
//! use payload::{classify, normalize, PayloadKind};
//!
//! let raw = br#"{"_host": "a", "temp": 21}"#;
//! let kind = classify(raw);
//! assert_eq!(kind, PayloadKind::Object);
//!
//! let normalized = normalize(raw, kind).unwrap();
//! assert_eq!(normalized.tags()["host"], "a");
//! ```

mod classify;
mod error;
mod normalize;
mod timestamp;

pub use classify::{classify, PayloadKind};
pub use error::{NormalizeError, Result};
pub use normalize::{normalize, normalize_bytes, NormalizedPayload, ScalarValue, SCALAR_KEY, TAG_MARKER};
pub use timestamp::{
    parse_legacy, parse_rfc3339, Timestamp, TimestampFormat, LEGACY_LAYOUT, TIMESTAMP_FIELDS,
};

//! RecordBuilder - turns one matched, normalized message into a Record

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use contracts::{Precision, Record};
use payload::NormalizedPayload;
use topic::{Binding, CompiledPattern};
use tracing::debug;

/// Tag holding the subscription pattern
pub const TAG_PATTERN: &str = "pattern";
/// Tag holding the concrete topic
pub const TAG_TOPIC: &str = "topic";
/// Tag holding all captured values joined with [`BINDINGS_SEPARATOR`]
pub const TAG_BINDINGS: &str = "bindings";
/// Tag holding the local client id
pub const TAG_CLIENT: &str = "client";
/// Prefix of the per-wildcard tags (`binding_0`, `binding_1`, ...)
pub const BINDING_TAG_PREFIX: &str = "binding_";

pub const BINDINGS_SEPARATOR: &str = ",";

/// Builds records for one bridge client
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    client_id: String,
}

impl RecordBuilder {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the record for one delivery
    ///
    /// The series is the pattern string. Synthetic tags override payload tags
    /// with the same key. Without a timestamp in the payload the record is
    /// stamped with `received_at` at second precision.
    pub fn build(
        &self,
        pattern: &CompiledPattern,
        topic: &str,
        bindings: &[Binding],
        normalized: &NormalizedPayload,
        received_at: DateTime<Utc>,
    ) -> Record {
        let mut tags = normalized.tags();

        for (key, value) in self.synthetic_tags(pattern, topic, bindings) {
            if let Some(lifted) = tags.insert(key.clone(), value) {
                debug!(tag = %key, dropped = %lifted, "payload tag shadowed by synthetic tag");
            }
        }

        let (timestamp, precision) = match normalized.timestamp() {
            Some(ts) => (ts.to_utc(), ts.precision),
            None => (received_at, Precision::Second),
        };

        Record {
            series: pattern.as_str().to_string(),
            tags,
            fields: normalized.fields(),
            timestamp,
            precision,
        }
    }

    fn synthetic_tags(
        &self,
        pattern: &CompiledPattern,
        topic: &str,
        bindings: &[Binding],
    ) -> BTreeMap<String, String> {
        let joined = bindings
            .iter()
            .map(|b| b.value.as_str())
            .collect::<Vec<_>>()
            .join(BINDINGS_SEPARATOR);

        let mut tags = BTreeMap::from([
            (TAG_PATTERN.to_string(), pattern.as_str().to_string()),
            (TAG_TOPIC.to_string(), topic.to_string()),
            (TAG_BINDINGS.to_string(), joined),
            (TAG_CLIENT.to_string(), self.client_id.clone()),
        ]);

        for binding in bindings {
            tags.insert(
                format!("{BINDING_TAG_PREFIX}{}", binding.slot),
                binding.value.clone(),
            );
        }

        tags
    }
}

//! LogSink - logs record summary via tracing

use contracts::{ContractError, DataSink, Record};
use tracing::{info, instrument};

/// Sink that logs record summaries for debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_record_summary(&self, record: &Record) {
        let fields = record
            .fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");

        info!(
            sink = %self.name,
            series = %record.series,
            topic = record.tags.get("topic").map(String::as_str).unwrap_or_default(),
            tags = record.tags.len(),
            timestamp = %record.timestamp,
            precision = record.precision.as_str(),
            fields = %fields,
            "Record received"
        );
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, record),
        fields(sink = %self.name, series = %record.series)
    )]
    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        self.log_record_summary(record);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

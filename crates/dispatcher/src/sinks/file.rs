//! FileSink - appends records to a local file

use contracts::{ContractError, DataSink, Record};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

use super::line_protocol;

/// On-disk record format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// InfluxDB line protocol
    Line,
}

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file, appended to
    pub path: PathBuf,
    /// Record format
    pub format: FileFormat,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let path = params
            .get("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output/records.jsonl"));

        let format = match params.get("format").map(String::as_str) {
            Some("line") => FileFormat::Line,
            Some("json") | None => FileFormat::Json,
            Some(other) => return Err(format!("unknown format '{}'", other)),
        };

        Ok(Self { path, format })
    }
}

/// Sink that appends records to a file
///
/// Writes are buffered; `flush` (also run on idle ticks) pushes them to disk.
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Create a new FileSink, creating parent directories as needed
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            config,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        let config = FileSinkConfig::from_params(params)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        Self::new(name, config)
    }

    fn encode(&self, record: &Record) -> std::io::Result<Option<String>> {
        match self.config.format {
            FileFormat::Json => serde_json::to_string(record)
                .map(Some)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            FileFormat::Line => Ok(line_protocol::encode(record)),
        }
    }

    fn append_record(&mut self, record: &Record) -> std::io::Result<()> {
        let Some(line) = self.encode(record)? else {
            debug!(sink = %self.name, series = %record.series, "Nothing encodable, skipped");
            return Ok(());
        };

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("sink closed"))?;
        writeln!(writer, "{line}")
    }

    fn persist_record(&mut self, record: &Record) -> Result<(), ContractError> {
        self.append_record(record).map_err(|e| {
            error!(sink = %self.name, series = %record.series, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, record),
        fields(sink = %self.name, series = %record.series)
    )]
    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        self.persist_record(record)?;
        Ok(())
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        debug!(sink = %self.name, path = %self.config.path.display(), "FileSink closed");
        Ok(())
    }
}

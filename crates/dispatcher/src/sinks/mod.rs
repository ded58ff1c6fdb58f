//! Sink implementations
//!
//! Contains LogSink, FileSink, NetworkSink and InfluxSink, plus the
//! `ConfiguredSink` wrapper built from `[[sinks]]` configuration.

mod file;
mod influx;
pub mod line_protocol;
mod log;
mod network;

pub use self::file::{FileFormat, FileSink, FileSinkConfig};
pub use self::influx::{InfluxSink, InfluxSinkConfig};
pub use self::log::LogSink;
pub use self::network::{NetworkFormat, NetworkSink, NetworkSinkConfig};

use contracts::{ContractError, DataSink, Record, SinkConfig, SinkType};
use tracing::instrument;

use crate::error::DispatcherError;

/// Any sink that can be built from configuration
pub enum ConfiguredSink {
    Log(LogSink),
    File(FileSink),
    Network(NetworkSink),
    Influx(InfluxSink),
}

impl DataSink for ConfiguredSink {
    fn name(&self) -> &str {
        match self {
            Self::Log(sink) => sink.name(),
            Self::File(sink) => sink.name(),
            Self::Network(sink) => sink.name(),
            Self::Influx(sink) => sink.name(),
        }
    }

    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        match self {
            Self::Log(sink) => sink.write(record).await,
            Self::File(sink) => sink.write(record).await,
            Self::Network(sink) => sink.write(record).await,
            Self::Influx(sink) => sink.write(record).await,
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        match self {
            Self::Log(sink) => sink.flush().await,
            Self::File(sink) => sink.flush().await,
            Self::Network(sink) => sink.flush().await,
            Self::Influx(sink) => sink.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            Self::Log(sink) => sink.close().await,
            Self::File(sink) => sink.close().await,
            Self::Network(sink) => sink.close().await,
            Self::Influx(sink) => sink.close().await,
        }
    }
}

/// Create a sink from configuration
#[instrument(
    name = "dispatcher_create_sink",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
pub async fn create_sink(config: &SinkConfig) -> Result<ConfiguredSink, DispatcherError> {
    match config.sink_type {
        SinkType::Log => Ok(ConfiguredSink::Log(LogSink::new(&config.name))),
        SinkType::File => FileSink::from_params(&config.name, &config.params)
            .map(ConfiguredSink::File)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string())),
        SinkType::Network => NetworkSink::from_params(&config.name, &config.params)
            .await
            .map(ConfiguredSink::Network)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string())),
        SinkType::Influx => InfluxSink::from_params(&config.name, &config.params)
            .map(ConfiguredSink::Influx)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string())),
    }
}

/// Create every configured sink, stopping at the first failure
#[instrument(
    name = "dispatcher_create_sinks",
    skip(configs),
    fields(sink_count = configs.len())
)]
pub async fn create_sinks(configs: &[SinkConfig]) -> Result<Vec<ConfiguredSink>, DispatcherError> {
    let mut sinks = Vec::with_capacity(configs.len());
    for config in configs {
        sinks.push(create_sink(config).await?);
    }
    Ok(sinks)
}

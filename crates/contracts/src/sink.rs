//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for record sinks.

use crate::{ContractError, Record};

/// Record output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Persist one record
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, record: &Record) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}

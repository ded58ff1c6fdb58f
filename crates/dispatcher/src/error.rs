//! Dispatcher error types

use bus::BusError;
use thiserror::Error;
use topic::PatternError;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Subscription pattern did not compile
    #[error("invalid subscription pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Bus operation failed
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Unknown subscription id
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),

    /// Too many consecutive failures of one sink
    #[error("sink '{sink_name}' failed {failures} consecutive writes or flushes, aborting")]
    SinkFailureLimit { sink_name: String, failures: u32 },

    /// Sink write error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}

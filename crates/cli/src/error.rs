//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration rejected after CLI overrides were applied
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// Broker connection error
    #[error("Failed to connect to broker at {uri}: {message}")]
    BrokerConnection { uri: String, message: String },

    /// Bridge execution error
    #[error("Bridge execution failed: {message}")]
    BridgeExecution { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    #[cfg_attr(not(feature = "real-mqtt"), allow(dead_code))]
    pub fn broker_connection(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerConnection {
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub fn bridge_execution(message: impl Into<String>) -> Self {
        Self::BridgeExecution {
            message: message.into(),
        }
    }
}

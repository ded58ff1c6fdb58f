//! Bus error types

use thiserror::Error;

/// Bus specific error
#[derive(Debug, Error)]
pub enum BusError {
    /// Connection error
    #[error("failed to connect to broker: {message}")]
    ConnectionFailed { message: String },

    /// Operation attempted before `connect`
    #[error("not connected to broker")]
    NotConnected,

    /// Subscribe error
    #[error("failed to subscribe to '{pattern}': {message}")]
    SubscribeFailed { pattern: String, message: String },

    /// Unsubscribe error
    #[error("failed to unsubscribe from '{pattern}': {message}")]
    UnsubscribeFailed { pattern: String, message: String },

    /// Publish error
    #[error("failed to publish to '{topic}': {message}")]
    PublishFailed { topic: String, message: String },
}

impl BusError {
    /// Create connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Create subscribe error
    pub fn subscribe(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create unsubscribe error
    pub fn unsubscribe(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsubscribeFailed {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create publish error
    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, BusError>;

//! Payload normalization errors

use thiserror::Error;

/// Normalization error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// Payload looked like an object (`{...}`) but did not parse as one
    #[error("malformed object payload: {message}")]
    MalformedObject {
        /// Parser message
        message: String,
    },
}

/// Payload Result 类型别名
pub type Result<T> = std::result::Result<T, NormalizeError>;

//! Pattern compilation errors

use thiserror::Error;

/// Error raised while compiling a subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Pattern string was empty
    #[error("pattern is empty")]
    Empty,

    /// Multi-level wildcard used somewhere other than the final segment
    #[error("multi-level wildcard '#' must be the last segment of '{pattern}' (found at segment {position})")]
    MisplacedMultiWildcard { pattern: String, position: usize },

    /// Generated matcher was rejected by the regex engine
    #[error("failed to build matcher for '{pattern}': {message}")]
    Matcher { pattern: String, message: String },
}

//! # Topic
//!
//! Subscription pattern compiler and topic matcher.
//!
//! Responsibilities:
//! - Compile `/`-separated patterns with `+` and `#` wildcards into a `CompiledPattern`
//! - Test concrete topics and extract wildcard bindings in pattern order
//! - Keep `$`-prefixed broker topics away from non-system patterns
//!
//! # Example
//!
//! ```
//! let pattern = topic::compile("sensors/+/temp").unwrap();
//! let bindings = pattern.matches("sensors/kitchen/temp").unwrap();
//! assert_eq!(bindings[0].value, "kitchen");
//! ```

mod error;
mod pattern;

pub use error::PatternError;
pub use pattern::{
    compile, matches, Binding, CompiledPattern, WildcardKind, WildcardSlot, HIDDEN_PREFIX,
    MULTI_WILDCARD, SEPARATOR, SINGLE_WILDCARD, SYSTEM_ROOT,
};

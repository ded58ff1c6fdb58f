//! # Contracts
//!
//! Frozen interface contracts shared by every bridge crate.
//! Business crates depend on this crate, never the other way round.
//!
//! ## Time Model
//! - Records carry a UTC instant plus the precision it should be stored at
//! - Receipt time at second precision is the fallback when the payload has no timestamp

mod blueprint;
mod error;
mod qos;
mod record;
mod sink;

pub use blueprint::*;
pub use error::*;
pub use qos::QoS;
pub use record::*;
pub use sink::*;

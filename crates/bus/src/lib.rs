//! # Bus
//!
//! Pub/sub bus collaborator.
//!
//! Responsibilities:
//! - Define the `BusClient` abstraction used by the dispatcher
//! - Route deliveries to per-subscription callbacks by compiled pattern
//! - Provide an in-memory `MockBus` for tests and dry runs
//!
//! ## Feature Flags
//!
//! - `real-mqtt`: Enable the MQTT client (requires rumqttc crate)

pub mod client;
pub mod error;
pub mod message;
pub mod mock_client;
mod routes;

#[cfg(feature = "real-mqtt")]
pub mod mqtt_client;

pub use client::BusClient;
pub use error::{BusError, Result};
pub use message::{BusMessage, DeliveryCallback, PublishedMessage};
pub use mock_client::{MockBus, MockConfig};

#[cfg(feature = "real-mqtt")]
pub use mqtt_client::{MqttBus, MqttSettings};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock shared client state; a panicked callback does not poison the bus
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

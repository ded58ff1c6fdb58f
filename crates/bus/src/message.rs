//! Messages exchanged with the bus

use std::sync::Arc;

use bytes::Bytes;
use contracts::QoS;

/// One delivery from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete topic the message was published on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
    /// Set by the bus when this is a redelivery
    pub duplicate: bool,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, duplicate: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            duplicate,
        }
    }
}

/// Callback invoked on the bus thread for every delivery matching a subscription
///
/// Implementations must hand the message off quickly; they may block to apply
/// backpressure but must not call back into the bus.
pub type DeliveryCallback = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// Publish call recorded by [`crate::MockBus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

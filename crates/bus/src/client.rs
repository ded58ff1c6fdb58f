//! Bus client abstraction
//!
//! Defines the trait for talking to a pub/sub broker, supporting the real
//! MQTT implementation and the in-memory mock.

use std::future::Future;

use bytes::Bytes;
use contracts::QoS;

use crate::error::Result;
use crate::message::DeliveryCallback;

/// Bus client trait
///
/// Every method takes `&self`; implementations use interior mutability so a
/// client can be shared with the threads that run delivery callbacks.
pub trait BusClient: Send + Sync {
    /// Local client id announced to the broker
    fn client_id(&self) -> &str;

    /// Connect to the broker
    ///
    /// Resolves once the broker has acknowledged the session.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to a topic pattern
    ///
    /// `callback` is invoked for every delivery whose topic matches `pattern`,
    /// on whatever thread the client delivers from.
    fn subscribe(
        &self,
        pattern: &str,
        qos: QoS,
        callback: DeliveryCallback,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a subscription previously created with the same pattern string
    fn unsubscribe(&self, pattern: &str) -> impl Future<Output = Result<()>> + Send;

    /// Publish a payload
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;
}

//! Broker transport abstraction
//!
//! The publisher only needs acknowledged publish and subscribe calls, so it
//! is written against this trait. [`super::MqttSession`] is the rumqttc
//! implementation; tests use the recording transport from `crate::mock`.

use crate::error::Result;
use async_trait::async_trait;

pub use rumqttc::QoS;

/// Acknowledged MQTT operations
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Publish a message and wait until the broker acknowledged it for `qos`
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a topic and wait for the SUBACK
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()>;

    /// Close the session; later operations fail
    async fn disconnect(&self) -> Result<()>;
}

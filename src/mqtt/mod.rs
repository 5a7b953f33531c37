//! MQTT publishing for lux readings
//!
//! # Topics
//!
//! With the default base topic `darkdetector`, discovery prefix
//! `homeassistant` and entity name `Light Sensor`:
//!
//! - `darkdetector/light_sensor/state`: lux readings, QoS 1, not retained
//! - `darkdetector/light_sensor/availability`: `online`/`offline`, QoS 2, retained
//! - `homeassistant/sensor/light_sensor/config`: discovery document, QoS 1, retained
//! - `homeassistant/status`: Home Assistant birth topic, subscribed at QoS 1

pub mod discovery;
pub mod publisher;
pub mod session;
pub mod topics;
pub mod transport;

pub use discovery::{DeviceInfo, DiscoveryDocument};
pub use publisher::{ConnectHooks, DiscoveryFlag, DiscoveryPublisher, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
pub use session::{ConnectionState, MqttSession, SessionHandler, SessionOptions};
pub use topics::{client_id, slug, Topics};
pub use transport::{MqttTransport, QoS};

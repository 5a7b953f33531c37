//! Topic naming for the sensor entity

use crate::config::{HassConfig, MqttConfig};

/// Derive the stable entity id from a display name.
///
/// Lower-cases and replaces spaces with underscores. Applying it twice gives
/// the same result, so the id survives restarts and renames that only change
/// letter case.
pub fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// All topics used by one sensor entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Entity id shared by the topics and the discovery document
    pub unique_id: String,
    /// Lux readings
    pub state: String,
    /// `online` / `offline`
    pub availability: String,
    /// Retained discovery document
    pub discovery_config: String,
    /// Home Assistant birth topic
    pub birth: String,
}

impl Topics {
    pub fn new(base_topic: &str, discovery_root: &str, entity_name: &str) -> Self {
        let unique_id = slug(entity_name);
        Self {
            state: format!("{base_topic}/{unique_id}/state"),
            availability: format!("{base_topic}/{unique_id}/availability"),
            discovery_config: format!("{discovery_root}/sensor/{unique_id}/config"),
            birth: format!("{discovery_root}/status"),
            unique_id,
        }
    }

    pub fn from_config(mqtt: &MqttConfig, hass: &HassConfig) -> Self {
        Self::new(&mqtt.base_topic, &hass.discovery_topic, &hass.entity_name)
    }
}

/// Broker client id: configured prefix plus the entity id
pub fn client_id(prefix: &str, entity_name: &str) -> String {
    format!("{prefix}-{}", slug(entity_name))
}

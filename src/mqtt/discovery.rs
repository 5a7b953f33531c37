//! Home Assistant MQTT discovery document

use super::topics::Topics;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Device class announced for the sensor
pub const DEVICE_CLASS: &str = "illuminance";

/// Unit announced for the sensor
pub const UNIT_OF_MEASUREMENT: &str = "lx";

/// Discovery payload for one illuminance sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub name: String,
    pub device_class: String,
    pub state_topic: String,
    pub unit_of_measurement: String,
    pub unique_id: String,
    pub availability_topic: String,
    pub has_entity_name: bool,
    pub device: DeviceInfo,
}

/// Device the sensor entity belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub identifiers: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn for_entity(unique_id: &str) -> Self {
        Self {
            name: "Dark Detector".to_string(),
            identifiers: unique_id.to_string(),
            manufacturer: "Dark Detector".to_string(),
            model: "darkdetector".to_string(),
        }
    }
}

impl DiscoveryDocument {
    pub fn new(entity_name: &str, topics: &Topics) -> Self {
        Self {
            name: entity_name.to_string(),
            device_class: DEVICE_CLASS.to_string(),
            state_topic: topics.state.clone(),
            unit_of_measurement: UNIT_OF_MEASUREMENT.to_string(),
            unique_id: topics.unique_id.clone(),
            availability_topic: topics.availability.clone(),
            has_entity_name: true,
            device: DeviceInfo::for_entity(&topics.unique_id),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

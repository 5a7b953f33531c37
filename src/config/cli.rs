//! Command line and environment configuration
//!
//! Every setting can be given as a flag or through the environment variable
//! of the same meaning, which is how container deployments configure the
//! service.

use super::{DetectorConfig, HassConfig, ImageConfig, MqttConfig};
use crate::acquisition::CropRegion;
use crate::error::{DetectorError, Result};
use crate::services::FailurePolicy;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Dark detector command line
#[derive(Parser, Debug, Clone)]
#[command(name = "dark-detector")]
#[command(about = "Estimate ambient light from a camera snapshot and publish it to MQTT")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Load settings from a TOML file instead of flags and environment
    #[arg(long, env = "DARK_DETECTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Snapshot URL
    #[arg(long, env = "IMAGE_URL")]
    pub image_url: Option<String>,

    /// Crop region as "x,y" or "x,y,width,height"
    #[arg(long, env = "IMAGE_CROP")]
    pub image_crop: Option<String>,

    /// Seconds between two measurements
    #[arg(long, env = "INTERVAL", default_value_t = 60)]
    pub interval: u64,

    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = super::DEFAULT_MQTT_PORT)]
    pub mqtt_port: u16,

    /// Base topic for state and availability
    #[arg(long, env = "MQTT_TOPIC", default_value = "darkdetector")]
    pub mqtt_topic: String,

    /// MQTT client id prefix
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "darkdetector")]
    pub mqtt_client_id: String,

    /// MQTT username
    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Publish Home Assistant discovery documents
    #[arg(
        long,
        env = "HASS_AUTO_DISCOVERY_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub hass_auto_discovery_enabled: bool,

    /// Home Assistant discovery prefix
    #[arg(long, env = "HASS_AUTO_DISCOVERY_TOPIC", default_value = super::DEFAULT_DISCOVERY_TOPIC)]
    pub hass_auto_discovery_topic: String,

    /// Sensor display name; its slug is the entity id
    #[arg(long, env = "HASS_NAME", default_value = "Light Sensor")]
    pub hass_name: String,

    /// Consecutive failed cycles tolerated before shutting down
    #[arg(long, env = "MAX_CONSECUTIVE_FAILURES", default_value_t = 1)]
    pub max_consecutive_failures: u32,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Also write logs to this file (rotated daily)
    #[arg(long, env = "DARK_DETECTOR_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Build and validate the service configuration
    pub fn to_config(&self) -> Result<DetectorConfig> {
        let config = match &self.config {
            Some(path) => DetectorConfig::from_toml_file(path)?,
            None => self.config_from_args()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Failure policy for the poll loop
    pub fn failure_policy(&self) -> Result<FailurePolicy> {
        FailurePolicy::new(self.max_consecutive_failures)
    }

    fn config_from_args(&self) -> Result<DetectorConfig> {
        let url = self
            .image_url
            .clone()
            .ok_or_else(|| DetectorError::config("IMAGE_URL environment variable is not set"))?;
        let host = self
            .mqtt_host
            .clone()
            .ok_or_else(|| DetectorError::config("MQTT_HOST environment variable is not set"))?;

        let crop = self
            .image_crop
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(str::parse::<CropRegion>)
            .transpose()?;

        let mut mqtt = MqttConfig::new(host);
        mqtt.port = self.mqtt_port;
        mqtt.normalize_host()?;
        mqtt.client_id = self.mqtt_client_id.clone();
        mqtt.username = self.mqtt_username.clone();
        mqtt.password = self.mqtt_password.clone();
        mqtt.base_topic = self.mqtt_topic.clone();

        Ok(DetectorConfig {
            image: ImageConfig {
                crop,
                interval: Duration::from_secs(self.interval),
                ..ImageConfig::new(url)
            },
            mqtt,
            hass: HassConfig {
                discovery_enabled: self.hass_auto_discovery_enabled,
                discovery_topic: self.hass_auto_discovery_topic.clone(),
                entity_name: self.hass_name.clone(),
            },
        })
    }
}

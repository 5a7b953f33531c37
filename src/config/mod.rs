//! Configuration management for the dark detector

pub mod cli;

pub use cli::Cli;

use crate::acquisition::{validate_image_url, CropRegion};
use crate::error::{DetectorError, Result};
use crate::error_recovery::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default poll interval between two measurements
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted poll interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default Home Assistant discovery prefix
pub const DEFAULT_DISCOVERY_TOPIC: &str = "homeassistant";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Image source configuration
    pub image: ImageConfig,

    /// MQTT broker configuration
    pub mqtt: MqttConfig,

    /// Home Assistant integration
    #[serde(default)]
    pub hass: HassConfig,
}

/// Image source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Snapshot URL (http or https)
    pub url: String,

    /// Optional region to measure instead of the whole image
    #[serde(default)]
    pub crop: Option<CropRegion>,

    /// Time between two measurements
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Per-request HTTP timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Download retry schedule
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// MQTT broker configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client id prefix; the entity slug is appended
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Root of the state and availability topics
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Keep-alive ping interval
    #[serde(with = "humantime_serde", default = "default_keep_alive")]
    pub keep_alive: Duration,

    /// Budget for the initial broker handshake
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub connect_timeout: Duration,

    /// Budget for a single acknowledged publish or subscribe
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub publish_timeout: Duration,
}

/// Home Assistant integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HassConfig {
    /// Publish the discovery document and follow the birth topic
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,

    /// Discovery prefix, `homeassistant` unless reconfigured in Home Assistant
    #[serde(default = "default_discovery_topic")]
    pub discovery_topic: String,

    /// Display name of the sensor entity
    #[serde(default = "default_entity_name")]
    pub entity_name: String,
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_client_id() -> String {
    "darkdetector".to_string()
}

fn default_base_topic() -> String {
    "darkdetector".to_string()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_discovery_topic() -> String {
    DEFAULT_DISCOVERY_TOPIC.to_string()
}

fn default_entity_name() -> String {
    "Light Sensor".to_string()
}

impl ImageConfig {
    /// Image configuration with defaults for everything but the URL
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            crop: None,
            interval: default_interval(),
            request_timeout: default_request_timeout(),
            retry: RetryPolicy::download(),
        }
    }
}

impl MqttConfig {
    /// Broker configuration with defaults for everything but the host
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            base_topic: default_base_topic(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_operation_timeout(),
            publish_timeout: default_operation_timeout(),
        }
    }

    /// Accept `tcp://host[:port]` and `mqtt://host[:port]` besides a bare host.
    ///
    /// A port in the address wins over [`MqttConfig::port`].
    pub fn normalize_host(&mut self) -> Result<()> {
        let raw = self.host.trim();
        if !raw.contains("://") {
            self.host = raw.to_string();
            return Ok(());
        }

        let url = Url::parse(raw)
            .map_err(|e| DetectorError::config(format!("invalid MQTT host {raw}: {e}")))?;
        if !matches!(url.scheme(), "tcp" | "mqtt") {
            return Err(DetectorError::config(format!(
                "unsupported MQTT scheme {}://, use tcp:// or a bare host",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| DetectorError::config(format!("MQTT host {raw} has no host name")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        if let Some(port) = url.port() {
            self.port = port;
        }
        self.host = host;
        Ok(())
    }

    /// Credentials are only used when both parts are present and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("base_topic", &self.base_topic)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            discovery_enabled: true,
            discovery_topic: default_discovery_topic(),
            entity_name: default_entity_name(),
        }
    }
}

impl DetectorConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)
            .map_err(|e| DetectorError::config(format!("invalid TOML: {e}")))?;
        config.mqtt.normalize_host()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DetectorError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_image_url(&self.image.url)?;

        if self.image.interval.is_zero() {
            return Err(DetectorError::config("interval must be greater than zero"));
        }
        if self.image.interval > MAX_INTERVAL {
            return Err(DetectorError::config("interval must not exceed 7 days"));
        }
        if self.image.request_timeout.is_zero() {
            return Err(DetectorError::config(
                "request timeout must be greater than zero",
            ));
        }
        if self.image.retry.max_attempts == 0 {
            return Err(DetectorError::config("retry attempts must be at least 1"));
        }
        if let Some(crop) = self.image.crop {
            if crop.width == 0 || crop.height == 0 {
                return Err(DetectorError::config(format!(
                    "crop region {crop} has zero area"
                )));
            }
        }

        if self.mqtt.host.trim().is_empty() {
            return Err(DetectorError::config("MQTT host must not be empty"));
        }
        if self.mqtt.host.contains("://") {
            return Err(DetectorError::config(format!(
                "MQTT host {} must be a host name without scheme",
                self.mqtt.host
            )));
        }
        if self.mqtt.port == 0 {
            return Err(DetectorError::config("MQTT port must not be zero"));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(DetectorError::config("MQTT client id must not be empty"));
        }
        if self.mqtt.base_topic.trim().is_empty() {
            return Err(DetectorError::config("MQTT base topic must not be empty"));
        }
        if self.mqtt.keep_alive < Duration::from_secs(5) {
            return Err(DetectorError::config(
                "MQTT keep alive must be at least 5 seconds",
            ));
        }
        if self.mqtt.connect_timeout.is_zero() || self.mqtt.publish_timeout.is_zero() {
            return Err(DetectorError::config(
                "MQTT timeouts must be greater than zero",
            ));
        }

        if self.hass.entity_name.trim().is_empty() {
            return Err(DetectorError::config("entity name must not be empty"));
        }
        if self.hass.discovery_enabled && self.hass.discovery_topic.trim().is_empty() {
            return Err(DetectorError::config(
                "discovery topic must not be empty while discovery is enabled",
            ));
        }

        Ok(())
    }
}

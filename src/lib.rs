//! Dark detector: ambient light estimation from camera snapshots
//!
//! The service periodically downloads a snapshot over HTTP, optionally crops
//! it, converts the pixels to relative luminance and publishes the result as
//! an illuminance reading over MQTT. Home Assistant picks the sensor up
//! through MQTT discovery.
//!
//! # Modules
//!
//! - [`acquisition`]: download with retry, decoding, cropping and lux estimation
//! - [`mqtt`]: broker session, topics and the discovery publisher
//! - [`services`]: the fixed-interval poll loop
//! - [`config`]: TOML, command line and environment configuration

pub mod acquisition;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod mqtt;
pub mod services;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use acquisition::{ImageAcquirer, Lux};
pub use config::DetectorConfig;
pub use error::{DetectorError, Result};
pub use mqtt::DiscoveryPublisher;
pub use services::{FailurePolicy, Poller};

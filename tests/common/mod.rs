//! Common test utilities

#![allow(dead_code)]

pub mod image_server;
pub mod mqtt_broker;
pub mod test_fixtures;

pub use image_server::MockImageServer;
pub use mqtt_broker::{eventually, FakeBroker};
pub use test_fixtures::*;

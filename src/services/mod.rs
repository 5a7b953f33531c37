//! Long-running services
//!
//! The poller ties acquisition and publishing together on a fixed schedule.

pub mod poller;

pub use poller::{FailurePolicy, LuxSink, LuxSource, Poller, PollerStats};

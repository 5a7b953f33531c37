//! Error recovery patterns for transient network failures
//!
//! Bounded retries with exponential backoff for image downloads, and the
//! capped reconnect backoff used by the MQTT session.

pub mod retry_policy;

// Re-export commonly used types
pub use retry_policy::{Backoff, RetryExecutor, RetryPolicy, RetryStats};

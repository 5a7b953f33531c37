//! Error types for the dark detector
//!
//! This module provides the crate error enum together with structured error
//! codes and severity levels, so failures surfaced to the poll loop can be
//! logged with consistent machine-readable context.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for detector operations
pub type Result<T> = std::result::Result<T, DetectorError>;

/// Error types for image acquisition and MQTT publishing
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Malformed URL, crop region, interval or broker settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Download or decode kept failing until the retry budget ran out
    #[error("Image acquisition failed after {attempts} attempts: {source}")]
    Acquisition {
        attempts: u32,
        #[source]
        source: Box<DetectorError>,
    },

    /// Image or crop region with zero area
    #[error("Image has no pixels to process")]
    EmptyImage,

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from the image source
    #[error("Unexpected HTTP status: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// Image decoding errors
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// MQTT connection errors
    #[error("MQTT connection error: {0}")]
    Connection(String),

    /// MQTT publish and subscribe errors
    #[error("MQTT publish error: {0}")]
    Publish(String),

    /// The caller's cancellation token fired
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Connection errors (1000-1099)
    ConnectionFailed,
    ConnectionTimeout,

    // Configuration errors (1200-1299)
    ConfigurationInvalid,

    // Acquisition errors (1300-1399)
    DownloadFailed,
    UnexpectedStatus,
    DecodeFailed,
    RetriesExhausted,
    EmptyImage,

    // Data errors (1400-1499)
    SerializationFailed,

    // Publish errors (1700-1799)
    PublishFailed,

    // Internal errors (1900-1999)
    Cancelled,
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::ConnectionFailed => 1001,
            ErrorCode::ConnectionTimeout => 1002,

            ErrorCode::ConfigurationInvalid => 1201,

            ErrorCode::DownloadFailed => 1301,
            ErrorCode::UnexpectedStatus => 1302,
            ErrorCode::DecodeFailed => 1303,
            ErrorCode::RetriesExhausted => 1304,
            ErrorCode::EmptyImage => 1305,

            ErrorCode::SerializationFailed => 1401,

            ErrorCode::PublishFailed => 1701,

            ErrorCode::Cancelled => 1901,
            ErrorCode::InternalError => 1902,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "connection",
            1200..=1299 => "configuration",
            1300..=1399 => "acquisition",
            1400..=1499 => "data",
            1700..=1799 => "protocol",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

/// Structured error context with additional metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code for machine processing
    pub code: ErrorCode,
    /// Component that generated the error
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional metadata about the error
    pub metadata: HashMap<String, serde_json::Value>,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Poll cycle number for correlation
    pub cycle: Option<u64>,
}

impl ErrorContext {
    /// Create new error context
    pub fn new(code: ErrorCode, component: &str, operation: &str) -> Self {
        Self {
            code,
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now(),
            cycle: None,
        }
    }

    /// Add metadata to error context
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the poll cycle this error belongs to
    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = Some(cycle);
        self
    }
}

impl DetectorError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a publish error
    pub fn publish<S: Into<String>>(msg: S) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Wrap the last attempt failure once the retry budget is spent
    pub fn acquisition(attempts: u32, last: DetectorError) -> Self {
        Self::Acquisition {
            attempts,
            source: Box::new(last),
        }
    }

    /// Map DetectorError to structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            DetectorError::Config(_) => ErrorCode::ConfigurationInvalid,
            DetectorError::Acquisition { .. } => ErrorCode::RetriesExhausted,
            DetectorError::EmptyImage => ErrorCode::EmptyImage,
            DetectorError::Http(e) if e.is_timeout() => ErrorCode::ConnectionTimeout,
            DetectorError::Http(_) => ErrorCode::DownloadFailed,
            DetectorError::HttpStatus(_) => ErrorCode::UnexpectedStatus,
            DetectorError::Decode(_) => ErrorCode::DecodeFailed,
            DetectorError::Connection(_) => ErrorCode::ConnectionFailed,
            DetectorError::Publish(_) => ErrorCode::PublishFailed,
            DetectorError::Cancelled(_) => ErrorCode::Cancelled,
            DetectorError::Json(_) => ErrorCode::SerializationFailed,
            DetectorError::Io(_) => ErrorCode::InternalError,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DetectorError::Config(_) => ErrorSeverity::Critical,
            DetectorError::Cancelled(_) => ErrorSeverity::Info,
            DetectorError::Http(_)
            | DetectorError::HttpStatus(_)
            | DetectorError::Decode(_)
            | DetectorError::Publish(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if a single attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DetectorError::Http(_)
                | DetectorError::HttpStatus(_)
                | DetectorError::Decode(_)
                | DetectorError::Connection(_)
                | DetectorError::Publish(_)
        )
    }

    /// Check if this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DetectorError::Cancelled(_))
    }
}

/// Error logging utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log an error with a tracing level derived from its severity
    pub fn log_error(error: &DetectorError, context: Option<ErrorContext>) {
        let code = error.to_error_code();
        let context = context.unwrap_or_else(|| ErrorContext::new(code, "unknown", "unknown"));

        match error.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                tracing::error!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = context.component,
                    operation = context.operation,
                    cycle = context.cycle,
                    metadata = ?context.metadata,
                    "Error occurred: {}",
                    error
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = code.as_number(),
                    category = code.category(),
                    component = context.component,
                    operation = context.operation,
                    cycle = context.cycle,
                    "Warning: {}",
                    error
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = code.as_number(),
                    component = context.component,
                    operation = context.operation,
                    "Info: {}",
                    error
                );
            }
        }
    }

    /// Flatten an error into metrics-style key/value pairs
    pub fn generate_metrics(error: &DetectorError) -> HashMap<String, serde_json::Value> {
        let code = error.to_error_code();
        HashMap::from([
            (
                "error_code".to_string(),
                serde_json::Value::Number(code.as_number().into()),
            ),
            (
                "category".to_string(),
                serde_json::Value::String(code.category().to_string()),
            ),
            (
                "severity".to_string(),
                serde_json::Value::String(format!("{:?}", error.severity())),
            ),
            (
                "retryable".to_string(),
                serde_json::Value::Bool(error.is_retryable()),
            ),
        ])
    }
}

/// Macro for easy structured error logging
#[macro_export]
macro_rules! log_structured_error {
    ($error:expr, $component:expr, $operation:expr) => {
        $crate::error::ErrorReporter::log_error(
            &$error,
            Some($crate::error::ErrorContext::new(
                $error.to_error_code(),
                $component,
                $operation,
            )),
        )
    };
    ($error:expr, $component:expr, $operation:expr, $cycle:expr) => {
        $crate::error::ErrorReporter::log_error(
            &$error,
            Some(
                $crate::error::ErrorContext::new($error.to_error_code(), $component, $operation)
                    .with_cycle($cycle),
            ),
        )
    };
}

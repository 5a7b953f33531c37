//! Logging configuration with optional file rotation

use crate::error::{DetectorError, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is not set
    pub level: Level,

    /// Also write to this file, rotated daily
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines on stderr instead of compact text
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(log_file) = std::env::var("DARK_DETECTOR_LOG_FILE") {
            if !log_file.is_empty() {
                config.file_path = Some(PathBuf::from(log_file));
            }
        }

        if let Ok(log_stderr) = std::env::var("DARK_DETECTOR_LOG_STDERR") {
            config.stderr = !log_stderr.eq_ignore_ascii_case("false");
        }

        if let Ok(format) = std::env::var("DARK_DETECTOR_LOG_FORMAT") {
            config.json = format.eq_ignore_ascii_case("json");
        }

        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.file_path = path;
        }
        self
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives take precedence over `config.level`.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let file_layer = match &config.file_path {
        Some(file_path) => {
            let directory = file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(directory)?;

            let file_name = file_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("dark-detector.log"));
            let file_appender = tracing_appender::rolling::daily(directory, file_name);

            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_thread_ids(config.thread_ids),
            )
        }
        None => None,
    };

    let stderr_text = (config.stderr && !config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_ids(config.thread_ids)
            .compact()
    });

    let stderr_json = (config.stderr && config.json).then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_ids(config.thread_ids)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| DetectorError::config(format!("failed to initialize logging: {e}")))
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::error::{SlipError, SlipResult};

/// Logging configuration for the slip tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    /// Only honoured when built with the `file_logging` feature
    pub enable_file_logging: bool,
    pub enable_json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            enable_file_logging: false,
            enable_json_format: false,
        }
    }
}

/// Keeps the non-blocking file writer alive. Hold it until exit.
#[derive(Default)]
pub struct LoggingGuard {
    #[cfg(feature = "file_logging")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the logging system
pub fn init_logging(config: &LoggingConfig) -> SlipResult<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("patti_slip={},patti={}", config.level, config.level))
    });

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .boxed();

    let registry = Registry::default().with(env_filter).with(console_layer);

    #[allow(unused_mut)]
    let mut guard = LoggingGuard::default();

    #[cfg(feature = "file_logging")]
    {
        if config.enable_file_logging {
            std::fs::create_dir_all(&config.log_dir).map_err(|e| {
                SlipError::file_io(config.log_dir.to_string_lossy().to_string(), e)
            })?;

            let file_appender = tracing_appender::rolling::daily(&config.log_dir, "patti.log");
            let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
            guard._file_guard = Some(file_guard);

            let file_layer = if config.enable_json_format {
                fmt::layer().json().with_writer(file_writer).boxed()
            } else {
                fmt::layer().with_writer(file_writer).with_ansi(false).boxed()
            };

            registry
                .with(file_layer)
                .try_init()
                .map_err(|e| SlipError::configuration(format!("logging already initialized: {}", e)))?;

            info!("🧾 patti logging initialized (file: {})", config.log_dir.display());
            return Ok(guard);
        }
    }

    registry
        .try_init()
        .map_err(|e| SlipError::configuration(format!("logging already initialized: {}", e)))?;

    info!("🧾 patti logging initialized");
    debug!("Log level: {}", config.level);
    Ok(guard)
}

/// Performance logging utilities
pub struct PerformanceTimer {
    start: std::time::Instant,
    operation: String,
}

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        debug!("⏱️  Starting: {}", operation);
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        debug!("⏱️  Completed {}: {}ms", self.operation, elapsed.as_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.enable_file_logging);
    }

    #[test]
    fn test_logging_config_partial_toml() {
        let config: LoggingConfig = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }
}

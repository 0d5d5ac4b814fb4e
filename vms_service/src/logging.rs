/// Logging setup and run-failure reporting for the ingestion service
///
/// Console output goes to stderr at the configured level so a scheduler
/// (cron, systemd timer) only mails real problems. An optional rotating
/// log file keeps the full debug trail of every run.

use std::fmt;

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{IngestError, Result};

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Keeps the background file writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn parse_level(name: &str) -> Result<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        other => Err(IngestError::config(format!("unknown log level '{}'", other))),
    }
}

pub fn parse_rotation(name: &str) -> Result<Rotation> {
    match name.trim().to_ascii_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" => Ok(Rotation::NEVER),
        other => Err(IngestError::config(format!("unknown log rotation '{}'", other))),
    }
}

/// Install the global subscriber.
///
/// `level_override` (the `--log-level` flag) wins over `RUST_LOG`, which
/// wins over `console_level`. The file layer, when a directory is
/// configured, always records debug and above.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) -> Result<LoggingGuard> {
    let console_filter = match level_override {
        Some(level) => EnvFilter::new(parse_level(level)?.to_string()),
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new(parse_level(&config.console_level)?.to_string()),
        },
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (file_layer, file_guard) = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let appender = RollingFileAppender::builder()
                .rotation(parse_rotation(&config.rotation)?)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .max_log_files(config.max_files)
                .build(directory)
                .map_err(|e| {
                    IngestError::config(format!(
                        "Could not open log directory {}: {}",
                        directory.display(),
                        e
                    ))
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| IngestError::config(format!("Could not install logger: {}", e)))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Upstream hiccup the next scheduled run is expected to get past
    Expected,
    /// Feed or capture problem that will not clear up by itself
    Data,
    /// Local fault: storage, configuration, clock, files
    Unexpected,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Data => write!(f, "DATA"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
        }
    }
}

pub fn classify_failure(err: &IngestError) -> FailureType {
    if err.is_retryable() {
        FailureType::Expected
    } else if err.is_payload_error()
        || matches!(err, IngestError::Network(_) | IngestError::Http(_))
    {
        FailureType::Data
    } else {
        FailureType::Unexpected
    }
}

/// Log the error that ended a run: expected upstream trouble at WARN,
/// everything else at ERROR.
pub fn log_run_failure(operation: &str, err: &IngestError) {
    let failure_type = classify_failure(err);
    match failure_type {
        FailureType::Expected => warn!("{} failed [{}]: {}", operation, failure_type, err),
        FailureType::Data | FailureType::Unexpected => {
            error!("{} failed [{}]: {}", operation, failure_type, err)
        }
    }
}

/// Summary line for a directory replay.
pub fn log_replay_summary(processed: usize, skipped: usize, rows_written: usize) {
    if skipped == 0 {
        info!(
            "Replay complete: {} files processed, {} rows written",
            processed, rows_written
        );
    } else {
        warn!(
            "Replay complete: {} files processed, {} skipped, {} rows written",
            processed, skipped, rows_written
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(parse_level("warn").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("WARNING").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level(" debug ").unwrap(), LevelFilter::DEBUG);
        assert!(matches!(parse_level("loud"), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_rotation_names() {
        assert_eq!(parse_rotation("daily").unwrap(), Rotation::DAILY);
        assert_eq!(parse_rotation("never").unwrap(), Rotation::NEVER);
        assert!(parse_rotation("weekly").is_err());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(classify_failure(&IngestError::Http(503)), FailureType::Expected);
        assert_eq!(classify_failure(&IngestError::EmptyReply), FailureType::Expected);
        assert_eq!(classify_failure(&IngestError::Http(404)), FailureType::Data);
        assert_eq!(
            classify_failure(&IngestError::validation("nbBike", "x", "not an integer")),
            FailureType::Data
        );
        assert_eq!(
            classify_failure(&IngestError::config("no database")),
            FailureType::Unexpected
        );
    }
}

use std::io;
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::ConnectorSettings;

/// Console level for a `-v` count: none is WARN, `-v` and `-vv` are INFO,
/// `-vvv` is DEBUG and anything above is TRACE.
pub fn verbosity_to_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 | 2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Parses level names as used in the HRM config, including `SUCCESS`,
/// `WARNING` and `CRITICAL`.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" | "SUCCESS" => Some(LevelFilter::INFO),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Some(LevelFilter::ERROR),
        "OFF" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// Keeps the file writer alive, logs are flushed when it's dropped.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the console logger on stderr and, unless disabled in the HRM
/// config, the file sink. A level from the config overrides the verbosity.
pub fn init(verbosity: u8, settings: Option<&ConnectorSettings>) -> LoggingGuard {
    let configured = settings
        .and_then(|settings| settings.log_level.as_deref())
        .and_then(parse_level);
    let console_level = configured.unwrap_or_else(|| verbosity_to_level(verbosity));
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(console_level.into())
                .from_env_lossy(),
        );

    let mut guard = None;
    let file_layer = settings
        .and_then(|settings| settings.log_file.as_deref())
        .and_then(|path| match file_appender(path) {
            Ok(appender) => {
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(configured.unwrap_or(LevelFilter::DEBUG)),
                )
            }
            Err(err) => {
                eprintln!("Adding a file sink for logging failed: {err}");
                None
            }
        });

    if tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        // already installed, e.g. when running embedded in tests
        return LoggingGuard { _file: guard };
    }

    tracing::info!(
        outcome = "success",
        "Logging verbosity requested: {verbosity} ({console_level})"
    );
    if let Some(path) = settings.and_then(|settings| settings.log_file.as_ref()) {
        if guard.is_some() {
            tracing::trace!("Added file sink for logging: {}.", path.display());
        }
    }
    LoggingGuard { _file: guard }
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, String> {
    let directory = path
        .parent()
        .ok_or_else(|| format!("no directory in {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("no file name in {}", path.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(verbosity_to_level(0), LevelFilter::WARN);
        assert_eq!(verbosity_to_level(1), LevelFilter::INFO);
        assert_eq!(verbosity_to_level(2), LevelFilter::INFO);
        assert_eq!(verbosity_to_level(3), LevelFilter::DEBUG);
        assert_eq!(verbosity_to_level(4), LevelFilter::TRACE);
        assert_eq!(verbosity_to_level(9), LevelFilter::TRACE);
    }

    #[test]
    fn config_level_names() {
        assert_eq!(parse_level("SUCCESS"), Some(LevelFilter::INFO));
        assert_eq!(parse_level("warning"), Some(LevelFilter::WARN));
        assert_eq!(parse_level(" DEBUG "), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("chatty"), None);
    }
}

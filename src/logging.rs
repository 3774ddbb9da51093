//! Logging setup
//!
//! Two outputs: a daily-rolling log file written through a non-blocking
//! worker, and stderr for the console. The file follows `RUST_LOG` when set
//! and the configured level otherwise. The console only shows `console_level`
//! and up, and never per-file failure lines: those would tear the progress
//! bar and are repeated in the run summary anyway.

use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{DropmakerError, IoContext, Result};
use crate::parallel::failure::FAILURE_TARGET;

/// Keeps the file writer alive. Dropping it flushes pending log lines.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. Call once, from `main`.
pub fn init(config: &LoggingConfig, console_level: &str) -> Result<LoggingGuard> {
    let (file_layer, file_guard) = match &config.file {
        Some(file_name) => {
            std::fs::create_dir_all(&config.directory).writing(&config.directory)?;

            let appender = tracing_appender::rolling::daily(&config.directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.level))
                .map_err(|e| {
                    DropmakerError::invalid_configuration(format!(
                        "Invalid log level '{}': {}",
                        config.level, e
                    ))
                })?;

            let layer = if config.json_format {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_filter(filter)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_filter(filter)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::new(console_directives(console_level)));

    if tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_err()
    {
        debug!("A global subscriber is already installed, keeping it");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Filter directives for the console layer
pub fn console_directives(console_level: &str) -> String {
    format!("{},{}=off", console_level, FAILURE_TARGET)
}

/// Console level for the `--verbose` / `--quiet` flags
pub fn console_level(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_console_level_flags() {
        assert_eq!(console_level(false, false), "warn");
        assert_eq!(console_level(true, false), "debug");
        assert_eq!(console_level(false, true), "error");
    }

    #[test]
    fn test_console_drops_failure_lines() {
        let directives = console_directives("debug");
        assert_eq!(directives, "debug,dropmaker::failures=off");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_failure_lines_skip_console_but_reach_file() {
        use crate::parallel::{FailureSink, LogFailureSink};
        use std::sync::Mutex;

        let dir = TempDir::new().unwrap();
        let file_log = dir.path().join("file.log");
        let console_log = dir.path().join("console.log");
        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(Mutex::new(std::fs::File::create(&file_log).unwrap()))
                    .with_ansi(false),
            )
            .with(
                fmt::layer()
                    .with_writer(Mutex::new(std::fs::File::create(&console_log).unwrap()))
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(console_directives("warn"))),
            );

        tracing::subscriber::with_default(subscriber, || {
            LogFailureSink.record("broken.png", &anyhow::anyhow!("bad header"));
            tracing::warn!("interrupted");
        });

        let file = std::fs::read_to_string(&file_log).unwrap();
        assert!(file.contains("broken.png"));
        assert!(file.contains("bad header"));

        let console = std::fs::read_to_string(&console_log).unwrap();
        assert!(!console.contains("broken.png"));
        assert!(console.contains("interrupted"));
    }

    #[test]
    fn test_init_creates_log_directory() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            ..LoggingConfig::default()
        };

        let guard = init(&config, "error").unwrap();
        tracing::info!("logging initialised in test");
        drop(guard);

        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_init_without_file_needs_no_directory() {
        let config = LoggingConfig {
            directory: "/definitely/not/created".into(),
            file: None,
            ..LoggingConfig::default()
        };

        assert!(init(&config, "error").is_ok());
        assert!(!std::path::Path::new("/definitely/not/created").exists());
    }
}

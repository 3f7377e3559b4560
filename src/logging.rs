//! Tracing setup for the pipeline runner and the one-shot commands.
//!
//! `dbheal start` mirrors every event into a daily-rotated JSON file so the
//! cycle history survives restarts. Every other command logs to stderr
//! only, leaving stdout for its JSON report.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// File name prefix of the rotating runner log.
pub const LOG_FILE_PREFIX: &str = "dbheal.log";

/// Flushes the runner log file when dropped. Hold it until shutdown.
pub struct LoggingGuard {
    _file_writer: WorkerGuard,
}

/// Parse a configured level or directive list such as `info` or
/// `dbheal=debug,sqlx=warn`.
///
/// # Errors
///
/// Returns an error if the directives do not parse.
pub fn level_filter(level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid logging.level {level:?}"))
}

/// `RUST_LOG` when set, the configured level otherwise.
fn filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => level_filter(&config.level),
    }
}

/// Install JSON file logging plus stderr output for `dbheal start`.
///
/// The file is `{dir}/dbheal.log.YYYY-MM-DD`.
///
/// # Errors
///
/// Returns an error if the level is invalid, the directory cannot be
/// created, or a subscriber is already installed.
pub fn init_runner(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let filter = filter(config)?;
    let dir: &Path = &config.dir;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create logs directory {}", dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        _file_writer: guard,
    })
}

/// Install stderr logging for a one-shot command.
///
/// # Errors
///
/// Returns an error if the configured level is invalid.
pub fn init_oneshot(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = filter(config)?;
    // An earlier subscriber keeps receiving events.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

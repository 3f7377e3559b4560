//! Configuration loading for the pipeline.
//!
//! Loads `dbheal.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid, and a
//! missing file yields the defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable overriding `database.path`.
pub const DATABASE_PATH_ENV: &str = "DBHEAL_DATABASE_PATH";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbhealConfig {
    /// Database location and pool sizing.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cycle behavior.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Audit report thresholds.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database location and pool sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding every pipeline table.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Connections in the read-only pool.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: u32,

    /// Seconds a connection waits on a locked database.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            read_pool_size: default_read_pool_size(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// Cycle behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Executor label written on every healing action.
    #[serde(default = "default_executed_by")]
    pub executed_by: String,

    /// Run the healing and admin review stages concurrently.
    #[serde(default)]
    pub parallel_dispatch: bool,

    /// Seconds between cycles for `dbheal start`.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executed_by: default_executed_by(),
            parallel_dispatch: false,
            interval_secs: default_interval_secs(),
        }
    }
}

/// Audit report thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Pending reviews above which admin attention is recommended.
    #[serde(default = "default_pending_review_alert")]
    pub pending_review_alert: u64,

    /// Integrity score a cycle must exceed to count as complete.
    #[serde(default = "default_integrity_complete_threshold")]
    pub integrity_complete_threshold: f64,

    /// Integrity score below which the audit raises a data integrity warning.
    #[serde(default = "default_integrity_warning_threshold")]
    pub integrity_warning_threshold: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            pending_review_alert: default_pending_review_alert(),
            integrity_complete_threshold: default_integrity_complete_threshold(),
            integrity_warning_threshold: default_integrity_warning_threshold(),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rotating JSON log used by `dbheal start`.
    #[serde(default = "default_logs_dir")]
    pub dir: PathBuf,

    /// Filter directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
            level: default_log_level(),
        }
    }
}

impl DbhealConfig {
    /// Validate that configuration values are within sane bounds.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.database.read_pool_size >= 1,
            "database.read_pool_size must be >= 1"
        );
        anyhow::ensure!(
            !self.database.path.as_os_str().is_empty(),
            "database.path must not be empty"
        );
        anyhow::ensure!(
            self.pipeline.interval_secs >= 10,
            "pipeline.interval_secs must be >= 10"
        );
        anyhow::ensure!(
            !self.pipeline.executed_by.trim().is_empty(),
            "pipeline.executed_by must not be empty"
        );
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.audit.integrity_complete_threshold),
            "audit.integrity_complete_threshold must be in [0, 100]"
        );
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.audit.integrity_warning_threshold),
            "audit.integrity_warning_threshold must be in [0, 100]"
        );
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level must not be empty"
        );
        Ok(())
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os(DATABASE_PATH_ENV).filter(|p| !p.is_empty()) {
            self.database.path = PathBuf::from(path);
        }
    }
}

/// Load configuration from a TOML file.
///
/// A missing file yields defaults. Environment overrides are applied
/// before validation.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<DbhealConfig> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str::<DbhealConfig>(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))?
    } else {
        DbhealConfig::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_database_path() -> PathBuf {
    PathBuf::from("dbheal.db")
}

fn default_read_pool_size() -> u32 {
    4
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_executed_by() -> String {
    "HEALING_ENGINE".to_owned()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_pending_review_alert() -> u64 {
    5
}

fn default_integrity_complete_threshold() -> f64 {
    90.0
}

fn default_integrity_warning_threshold() -> f64 {
    95.0
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_owned()
}

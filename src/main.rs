//! dbheal CLI entry point.
//!
//! Runs a single pipeline cycle, runs cycles periodically, or reports on
//! the pipeline. Every report is printed to stdout as JSON; logs go to stderr.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use dbheal::config::{load_config, DbhealConfig};
use dbheal::logging;
use dbheal::orchestrator::Orchestrator;
use dbheal::rulebook::Rulebook;
use dbheal::store::sqlite::SqliteStore;

/// dbheal: rule-based triage, simulated healing, and admin review for
/// detected database issues.
#[derive(Parser)]
#[command(name = "dbheal", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "dbheal.toml")]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run one pipeline cycle and print the cycle report.
    Cycle,
    /// Run cycles periodically until interrupted.
    Start,
    /// Print engine statistics, rulebook, guards, and integrity.
    Status,
    /// Print a full audit report.
    Audit,
    /// Print the loaded rulebook.
    Rules,
    /// List admin reviews awaiting a human.
    Pending,
    /// Record a reviewer's disposition on an admin review.
    Review {
        /// Review identifier.
        review_id: String,
        /// Action taken, e.g. APPROVED or REJECTED.
        #[arg(long)]
        action: String,
        /// Optional comment.
        #[arg(long)]
        comment: Option<String>,
        /// Mark the disposition as overriding the original decision.
        #[arg(long = "override")]
        override_flag: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Missing .env is fine.
    let _ = dotenvy::dotenv();

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    // An invalid rulebook makes every later decision untrustworthy.
    let rulebook = Arc::new(Rulebook::initialize().context("rulebook validation failed")?);

    match cli.command {
        Command::Start => handle_start(&config, rulebook).await,
        command => {
            logging::init_oneshot(&config.logging)?;
            handle_oneshot(command, &config, rulebook).await
        }
    }
}

async fn handle_oneshot(
    command: Command,
    config: &DbhealConfig,
    rulebook: Arc<Rulebook>,
) -> anyhow::Result<()> {
    if let Command::Rules = command {
        return print_json(&rulebook.summary());
    }

    let store = open_store(config).await?;
    let orchestrator = Orchestrator::new(rulebook, store.reader(), store.writer(), config);

    let outcome = match command {
        Command::Cycle => print_json(&orchestrator.run_cycle().await),
        Command::Status => match orchestrator.system_status().await {
            Ok(status) => print_json(&status),
            Err(e) => Err(anyhow::Error::new(e).context("failed to gather system status")),
        },
        Command::Audit => print_json(&orchestrator.generate_audit_report().await),
        Command::Pending => match orchestrator.review_engine().pending_reviews().await {
            Ok(pending) => print_json(&pending),
            Err(e) => Err(anyhow::Error::new(e).context("failed to list pending reviews")),
        },
        Command::Review {
            review_id,
            action,
            comment,
            override_flag,
        } => {
            handle_review(
                &orchestrator,
                &review_id,
                &action,
                comment.as_deref(),
                override_flag,
            )
            .await
        }
        Command::Start | Command::Rules => Ok(()),
    };

    store.close().await;
    outcome
}

async fn handle_review(
    orchestrator: &Orchestrator,
    review_id: &str,
    action: &str,
    comment: Option<&str>,
    override_flag: bool,
) -> anyhow::Result<()> {
    let matched = orchestrator
        .review_engine()
        .simulate_admin_action(review_id, action, comment, override_flag)
        .await
        .with_context(|| format!("failed to update admin review {review_id}"))?;
    anyhow::ensure!(matched, "no admin review with id {review_id}");
    print_json(&serde_json::json!({
        "review_id": review_id,
        "admin_action": action.trim().to_uppercase(),
        "override_flag": override_flag,
        "updated": true,
    }))
}

/// Run cycles on a fixed interval until Ctrl-C.
async fn handle_start(config: &DbhealConfig, rulebook: Arc<Rulebook>) -> anyhow::Result<()> {
    let _logging_guard = logging::init_runner(&config.logging)?;

    let store = open_store(config).await?;
    let orchestrator = Orchestrator::new(rulebook, store.reader(), store.writer(), config);

    info!(
        database = %config.database.path.display(),
        interval_secs = config.pipeline.interval_secs,
        parallel_dispatch = config.pipeline.parallel_dispatch,
        "dbheal pipeline started"
    );

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
        config.pipeline.interval_secs,
    ));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = orchestrator.run_cycle().await;
                if !report.overall_success {
                    warn!(
                        cycle_id = %report.cycle_id,
                        stages_failed = report.summary.stages_failed,
                        safety_compliant = report.summary.safety_compliant,
                        "cycle did not complete cleanly"
                    );
                }
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for shutdown signal");
                }
                info!("shutdown requested");
                break;
            }
        }
    }

    store.close().await;
    Ok(())
}

async fn open_store(config: &DbhealConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.database)
        .await
        .with_context(|| format!("failed to open {}", config.database.path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render report")?;
    println!("{rendered}");
    Ok(())
}

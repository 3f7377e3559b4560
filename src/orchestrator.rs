//! Pipeline orchestration: one cycle runs decision, healing, admin review,
//! and safety validation stages, then scores workflow integrity.
//!
//! Stages are isolated. A failing stage is recorded in the [`CycleReport`]
//! and the remaining stages still run, since each works on its own backlog.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{AuditConfig, DbhealConfig};
use crate::engine::decision::{DecisionBatchResult, DecisionEngine};
use crate::engine::healing::{HealingBatchResult, HealingEngine, HealingSafetyReport};
use crate::engine::review::{Priority, ReviewBatchResult, ReviewEngine};
use crate::engine::EngineError;
use crate::rulebook::{Rulebook, RulebookSummary};
use crate::safety::{self, SafetyReport};
use crate::stats::{
    DecisionStatistics, HealingStatistics, LearningStatistics, ReviewStatistics,
};
use crate::store::{now_timestamp, IntegrityCounts, ReadStore, WriteStore};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Result of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome<T> {
    /// Whether the stage ran to completion.
    pub success: bool,
    /// Wall-clock time spent in the stage.
    pub duration_secs: f64,
    /// Stage output when it succeeded.
    pub result: Option<T>,
    /// Failure message when it did not.
    pub error: Option<String>,
}

/// Output of the safety validation stage.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyValidation {
    /// Decision integrity counters.
    pub decision_integrity: IntegrityCounts,
    /// Scan of every recorded healing action.
    pub healing_safety: HealingSafetyReport,
    /// Static description of the active guards.
    pub safety_report: SafetyReport,
    /// True when no recorded action breaks the simulation-only policy.
    pub overall_safe: bool,
}

/// Per-stage outcomes of a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStages {
    /// Decision stage.
    pub decisions: StageOutcome<DecisionBatchResult>,
    /// Healing stage.
    pub healing: StageOutcome<HealingBatchResult>,
    /// Admin review stage.
    pub admin_reviews: StageOutcome<ReviewBatchResult>,
    /// Safety validation stage.
    pub safety_validation: StageOutcome<SafetyValidation>,
}

/// Counts across the stages of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Issues selected by the decision stage.
    pub total_issues_processed: usize,
    /// Decisions written.
    pub total_decisions_made: usize,
    /// Healing actions written.
    pub total_actions_executed: usize,
    /// Reviews written.
    pub total_reviews_created: usize,
    /// AUTO_HEAL decisions written.
    pub auto_heal_count: usize,
    /// ADMIN_REVIEW decisions written.
    pub admin_review_count: usize,
    /// Healing actions with status SUCCESS.
    pub successful_actions: usize,
    /// Healing actions with status FAILED.
    pub failed_actions: usize,
    /// Per-item errors across all stages.
    pub item_errors: usize,
    /// Whether safety validation ran and found nothing.
    pub safety_compliant: bool,
    /// Stages that ran to completion.
    pub stages_completed: usize,
    /// Stages that failed.
    pub stages_failed: usize,
}

impl CycleSummary {
    fn from_stages(stages: &CycleStages) -> Self {
        let mut summary = Self::default();
        let mut tally = |success: bool| {
            if success {
                summary.stages_completed = summary.stages_completed.saturating_add(1);
            } else {
                summary.stages_failed = summary.stages_failed.saturating_add(1);
            }
        };
        tally(stages.decisions.success);
        tally(stages.healing.success);
        tally(stages.admin_reviews.success);
        tally(stages.safety_validation.success);

        if let Some(r) = &stages.decisions.result {
            summary.total_issues_processed = r.processed;
            summary.total_decisions_made = r.created;
            summary.auto_heal_count = r.auto_heal_count;
            summary.admin_review_count = r.admin_review_count;
            summary.item_errors = summary.item_errors.saturating_add(r.errors.len());
        }
        if let Some(r) = &stages.healing.result {
            summary.total_actions_executed = r.executed;
            summary.successful_actions = r.succeeded;
            summary.failed_actions = r.failed;
            summary.item_errors = summary.item_errors.saturating_add(r.errors.len());
        }
        if let Some(r) = &stages.admin_reviews.result {
            summary.total_reviews_created = r.created;
            summary.item_errors = summary.item_errors.saturating_add(r.errors.len());
        }
        summary.safety_compliant = stages
            .safety_validation
            .result
            .as_ref()
            .is_some_and(|r| r.overall_safe);

        summary
    }
}

/// Integrity of the issue-to-decision workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowIntegrity {
    /// Issues with no decision.
    pub issues_without_decisions: i64,
    /// Decisions whose issue does not exist.
    pub decisions_without_issues: i64,
    /// `max(0, 100 - 10 × (issues_without_decisions + decisions_without_issues))`.
    pub integrity_score: f64,
    /// Whether the score exceeds the completion threshold.
    pub workflow_complete: bool,
    /// Set when the counts could not be read.
    pub error: Option<String>,
}

/// Full record of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// `cycle_YYYYMMDD_HHMMSS`.
    pub cycle_id: String,
    /// When the cycle started.
    pub started_at: String,
    /// When the cycle finished.
    pub completed_at: String,
    /// Wall-clock duration.
    pub total_duration_secs: f64,
    /// Per-stage outcomes.
    pub stages: CycleStages,
    /// Counts across stages.
    pub summary: CycleSummary,
    /// Integrity after the cycle.
    pub integrity: WorkflowIntegrity,
    /// Every stage succeeded and safety validation found nothing.
    pub overall_success: bool,
}

/// Statistics from each engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatistics {
    /// Decision engine.
    pub decisions: DecisionStatistics,
    /// Healing engine.
    pub healing: HealingStatistics,
    /// Admin review engine.
    pub admin_reviews: ReviewStatistics,
    /// Learning outcomes recorded by the healing engine.
    pub learning: LearningStatistics,
}

/// Snapshot of the whole pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// When the snapshot was taken.
    pub timestamp: String,
    /// Per-engine statistics.
    pub engines: EngineStatistics,
    /// Loaded rules.
    pub rulebook: RulebookSummary,
    /// Active guards.
    pub safety: SafetyReport,
    /// Workflow integrity.
    pub workflow_integrity: WorkflowIntegrity,
}

/// Area an audit recommendation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationCategory {
    /// Review backlog.
    AdminWorkload,
    /// Issue/decision consistency.
    DataIntegrity,
    /// Recorded actions breaking the simulation-only policy.
    SafetyCompliance,
    /// Routine upkeep.
    Maintenance,
    /// The audit itself hit an error.
    SystemError,
}

/// One heuristic recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecommendation {
    /// How urgent it is.
    pub priority: Priority,
    /// Area it concerns.
    pub category: RecommendationCategory,
    /// Short title.
    pub title: String,
    /// What was observed.
    pub description: String,
    /// What to do.
    pub action: String,
}

/// Full audit of the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    /// `audit_YYYYMMDD_HHMMSS`.
    pub report_id: String,
    /// When the report was generated.
    pub generated_at: String,
    /// Pipeline snapshot, absent if it could not be gathered.
    pub system_status: Option<SystemStatus>,
    /// Active guards.
    pub safety_compliance: SafetyReport,
    /// Scan of recorded healing actions, absent if it could not be read.
    pub healing_safety: Option<HealingSafetyReport>,
    /// Loaded rules.
    pub rulebook_verification: RulebookSummary,
    /// Workflow integrity.
    pub workflow_integrity: WorkflowIntegrity,
    /// Heuristic recommendations.
    pub recommendations: Vec<AuditRecommendation>,
    /// Errors hit while gathering the report.
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives the engines through a cycle and reports on the pipeline.
pub struct Orchestrator {
    rulebook: Arc<Rulebook>,
    reader: Arc<dyn ReadStore>,
    decisions: DecisionEngine,
    healing: HealingEngine,
    reviews: ReviewEngine,
    parallel_dispatch: bool,
    audit: AuditConfig,
}

impl Orchestrator {
    /// Wire the engines over the given rulebook and store capabilities.
    pub fn new(
        rulebook: Arc<Rulebook>,
        reader: Arc<dyn ReadStore>,
        writer: Arc<dyn WriteStore>,
        config: &DbhealConfig,
    ) -> Self {
        Self {
            decisions: DecisionEngine::new(rulebook.clone(), reader.clone(), writer.clone()),
            healing: HealingEngine::new(
                rulebook.clone(),
                reader.clone(),
                writer.clone(),
                config.pipeline.executed_by.clone(),
            ),
            reviews: ReviewEngine::new(reader.clone(), writer),
            rulebook,
            reader,
            parallel_dispatch: config.pipeline.parallel_dispatch,
            audit: config.audit.clone(),
        }
    }

    /// Decision engine.
    pub fn decision_engine(&self) -> &DecisionEngine {
        &self.decisions
    }

    /// Healing engine.
    pub fn healing_engine(&self) -> &HealingEngine {
        &self.healing
    }

    /// Admin review engine.
    pub fn review_engine(&self) -> &ReviewEngine {
        &self.reviews
    }

    /// Run one full cycle. Never fails; stage failures are recorded in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let started_at = now_timestamp();
        let cycle_id = format!("cycle_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        info!(cycle_id = %cycle_id, parallel = self.parallel_dispatch, "starting healing cycle");

        let decisions = run_stage("decisions", self.decisions.process_new_issues()).await;

        let (healing, admin_reviews) = if self.parallel_dispatch {
            tokio::join!(
                run_stage("healing", self.healing.process_auto_heal_decisions()),
                run_stage("admin_reviews", self.reviews.process_admin_review_decisions()),
            )
        } else {
            let healing = run_stage("healing", self.healing.process_auto_heal_decisions()).await;
            let reviews =
                run_stage("admin_reviews", self.reviews.process_admin_review_decisions()).await;
            (healing, reviews)
        };

        let safety_validation = run_stage("safety_validation", self.validate_safety()).await;

        let stages = CycleStages {
            decisions,
            healing,
            admin_reviews,
            safety_validation,
        };
        let summary = CycleSummary::from_stages(&stages);
        let integrity = self.workflow_integrity().await;
        let overall_success = summary.stages_failed == 0 && summary.safety_compliant;

        let total_duration_secs = started.elapsed().as_secs_f64();
        info!(
            cycle_id = %cycle_id,
            duration_secs = total_duration_secs,
            decisions = summary.total_decisions_made,
            actions = summary.total_actions_executed,
            reviews = summary.total_reviews_created,
            stages_failed = summary.stages_failed,
            integrity_score = integrity.integrity_score,
            overall_success,
            "healing cycle complete"
        );

        CycleReport {
            cycle_id,
            started_at,
            completed_at: now_timestamp(),
            total_duration_secs,
            stages,
            summary,
            integrity,
            overall_success,
        }
    }

    async fn validate_safety(&self) -> Result<SafetyValidation, EngineError> {
        let decision_integrity = self.decisions.validate_decision_integrity().await?;
        let healing_safety = self.healing.validate_healing_safety().await?;
        let overall_safe = healing_safety.is_safe;
        Ok(SafetyValidation {
            decision_integrity,
            healing_safety,
            safety_report: safety::safety_report(),
            overall_safe,
        })
    }

    /// Score the issue-to-decision workflow. A read failure scores 0.
    pub async fn workflow_integrity(&self) -> WorkflowIntegrity {
        match self.decisions.validate_decision_integrity().await {
            Ok(counts) => {
                let integrity_score =
                    integrity_score(counts.issues_without_decisions, counts.decisions_without_issues);
                WorkflowIntegrity {
                    issues_without_decisions: counts.issues_without_decisions,
                    decisions_without_issues: counts.decisions_without_issues,
                    integrity_score,
                    workflow_complete: integrity_score > self.audit.integrity_complete_threshold,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = %e, "failed to check workflow integrity");
                WorkflowIntegrity {
                    issues_without_decisions: 0,
                    decisions_without_issues: 0,
                    integrity_score: 0.0,
                    workflow_complete: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Gather statistics from every engine plus rulebook, guards, and integrity.
    ///
    /// # Errors
    ///
    /// Returns an error if any statistics query fails.
    pub async fn system_status(&self) -> Result<SystemStatus, EngineError> {
        let engines = EngineStatistics {
            decisions: self.decisions.statistics().await?,
            healing: self.healing.statistics().await?,
            admin_reviews: self.reviews.statistics().await?,
            learning: LearningStatistics::from_rows(self.reader.learning_stats().await?),
        };
        Ok(SystemStatus {
            timestamp: now_timestamp(),
            engines,
            rulebook: self.rulebook.summary(),
            safety: safety::safety_report(),
            workflow_integrity: self.workflow_integrity().await,
        })
    }

    /// Compose a full audit report. Never fails; gathering errors are listed
    /// in the report and raise a SYSTEM_ERROR recommendation.
    pub async fn generate_audit_report(&self) -> AuditReport {
        let report_id = format!("audit_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let mut errors = Vec::new();

        let system_status = match self.system_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "failed to gather system status for audit");
                errors.push(format!("system status: {e}"));
                None
            }
        };

        let healing_safety = match self.healing.validate_healing_safety().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "failed to scan healing actions for audit");
                errors.push(format!("healing safety: {e}"));
                None
            }
        };

        let pending_reviews = match self.reviews.pending_reviews().await {
            Ok(pending) => Some(pending.len()),
            Err(e) => {
                warn!(error = %e, "failed to read pending reviews for audit");
                errors.push(format!("pending reviews: {e}"));
                None
            }
        };

        let workflow_integrity = self.workflow_integrity().await;
        let recommendations = audit_recommendations(
            &self.audit,
            pending_reviews,
            &workflow_integrity,
            healing_safety.as_ref(),
            &errors,
        );

        info!(
            report_id = %report_id,
            recommendations = recommendations.len(),
            errors = errors.len(),
            "audit report generated"
        );

        AuditReport {
            report_id,
            generated_at: now_timestamp(),
            system_status,
            safety_compliance: safety::safety_report(),
            healing_safety,
            rulebook_verification: self.rulebook.summary(),
            workflow_integrity,
            recommendations,
            errors,
        }
    }
}

async fn run_stage<T, F>(name: &'static str, stage: F) -> StageOutcome<T>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let started = Instant::now();
    info!(stage = name, "stage starting");
    let outcome = stage.await;
    let duration_secs = started.elapsed().as_secs_f64();
    match outcome {
        Ok(result) => StageOutcome {
            success: true,
            duration_secs,
            result: Some(result),
            error: None,
        },
        Err(e) => {
            error!(stage = name, error = %e, "stage failed");
            StageOutcome {
                success: false,
                duration_secs,
                result: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// `max(0, 100 - 10 × (issues_without_decisions + decisions_without_issues))`.
pub fn integrity_score(issues_without_decisions: i64, decisions_without_issues: i64) -> f64 {
    let problems = issues_without_decisions
        .max(0)
        .saturating_add(decisions_without_issues.max(0));
    let points = 100_i64.saturating_sub(problems.saturating_mul(10)).max(0);

    #[allow(clippy::cast_precision_loss)]
    let score = points as f64;
    score
}

/// Heuristic recommendations for an audit.
pub fn audit_recommendations(
    config: &AuditConfig,
    pending_reviews: Option<usize>,
    integrity: &WorkflowIntegrity,
    healing_safety: Option<&HealingSafetyReport>,
    errors: &[String],
) -> Vec<AuditRecommendation> {
    let mut recommendations = Vec::new();

    if let Some(pending) = pending_reviews {
        if u64::try_from(pending).unwrap_or(u64::MAX) > config.pending_review_alert {
            recommendations.push(AuditRecommendation {
                priority: Priority::Medium,
                category: RecommendationCategory::AdminWorkload,
                title: "High number of pending admin reviews".to_owned(),
                description: format!("{pending} reviews pending admin attention"),
                action: "Review and process pending admin reviews".to_owned(),
            });
        }
    }

    if integrity.integrity_score < config.integrity_warning_threshold {
        recommendations.push(AuditRecommendation {
            priority: Priority::High,
            category: RecommendationCategory::DataIntegrity,
            title: "Workflow integrity issues detected".to_owned(),
            description: format!("Integrity score: {}%", integrity.integrity_score),
            action: "Investigate and resolve data integrity issues".to_owned(),
        });
    }

    if let Some(report) = healing_safety.filter(|r| !r.is_safe) {
        recommendations.push(AuditRecommendation {
            priority: Priority::High,
            category: RecommendationCategory::SafetyCompliance,
            title: "Non-simulated healing actions recorded".to_owned(),
            description: format!(
                "{} unsafe actions, {} violations",
                report.unsafe_actions,
                report.violations.len()
            ),
            action: "Audit the healing_actions table and the component that wrote them"
                .to_owned(),
        });
    }

    recommendations.push(AuditRecommendation {
        priority: Priority::Low,
        category: RecommendationCategory::Maintenance,
        title: "Regular safety audit recommended".to_owned(),
        description: "Periodic safety validation ensures continued compliance".to_owned(),
        action: "Schedule regular safety audits".to_owned(),
    });

    for e in errors {
        recommendations.push(AuditRecommendation {
            priority: Priority::High,
            category: RecommendationCategory::SystemError,
            title: "Error generating audit".to_owned(),
            description: e.clone(),
            action: "Investigate system error".to_owned(),
        });
    }

    recommendations
}

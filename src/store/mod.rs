//! Capability-scoped access to the pipeline tables.
//!
//! Reading and writing are separate traits so a component holding only a
//! [`ReadStore`] cannot issue a write. Every read query passes
//! [`crate::safety::validate_read_query`] and every write passes
//! [`crate::safety::validate_write`] before it reaches the database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::review::{Priority, Recommendations};
use crate::rulebook::{ActionType, DecisionType, ExecutionMode, ExecutionStatus};
use crate::safety::SafetyViolation;

/// SQLite adapter implementing both capabilities.
pub mod sqlite;

/// Table names known to the pipeline.
pub mod table {
    /// Issues written by the external detector. Never written here.
    pub const DETECTED_ISSUES: &str = "detected_issues";
    /// One decision per issue.
    pub const DECISION_LOG: &str = "decision_log";
    /// One simulated action per AUTO_HEAL decision.
    pub const HEALING_ACTIONS: &str = "healing_actions";
    /// One review per ADMIN_REVIEW decision.
    pub const ADMIN_REVIEWS: &str = "admin_reviews";
    /// Learning outcomes, recorded outside the pipeline and only read here.
    pub const LEARNING_HISTORY: &str = "learning_history";
}

/// Current time as an RFC 3339 UTC string with microsecond precision.
///
/// All timestamps share this format so they sort lexicographically.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A guard rejected the query or write before it was issued.
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
    /// The database rejected or failed the statement.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A JSON column could not be encoded.
    #[error("failed to encode JSON column: {0}")]
    Encode(#[from] serde_json::Error),
    /// A stored value could not be decoded.
    #[error("failed to decode {column}: {detail}")]
    Decode {
        /// Column holding the bad value.
        column: &'static str,
        /// What went wrong.
        detail: String,
    },
}

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InsertOutcome {
    /// The row was written.
    Inserted,
    /// A row for the same parent already exists; nothing was written.
    Duplicate,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A detected issue, as written by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue identifier.
    pub id: String,
    /// Raw issue type label. May be a type the rulebook does not know.
    pub issue_type: String,
    /// Component that detected the issue.
    pub detection_source: String,
    /// Metric value that triggered detection.
    pub raw_metric_value: Option<f64>,
    /// Unit of the metric value.
    pub raw_metric_unit: Option<String>,
    /// When the issue was detected.
    pub detected_at: String,
}

/// A recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Decision identifier.
    pub id: String,
    /// Issue this decision is for.
    pub issue_id: String,
    /// Outcome category.
    pub decision_type: DecisionType,
    /// Audit-trail reason including every context value used.
    pub reason: String,
    /// Confidence of the applied rule.
    pub confidence: f64,
    /// When the decision was made.
    pub decided_at: String,
}

/// A decision awaiting a downstream record, joined with its issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingDecision {
    /// Decision identifier.
    pub decision_id: String,
    /// Issue identifier.
    pub issue_id: String,
    /// Decision reason.
    pub reason: String,
    /// Decision confidence.
    pub confidence: f64,
    /// When the decision was made.
    pub decided_at: String,
    /// Raw issue type label.
    pub issue_type: String,
    /// Detecting component.
    pub detection_source: String,
    /// Metric value.
    pub raw_metric_value: Option<f64>,
    /// Metric unit.
    pub raw_metric_unit: Option<String>,
    /// When the issue was detected.
    pub detected_at: String,
}

/// A simulated healing action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingAction {
    /// Action identifier.
    pub id: String,
    /// AUTO_HEAL decision this action belongs to.
    pub decision_id: String,
    /// Action simulated.
    pub action_type: ActionType,
    /// Always [`ExecutionMode::Simulated`] when written by the healing engine.
    pub execution_mode: ExecutionMode,
    /// Component that recorded the action.
    pub executed_by: String,
    /// Simulated outcome.
    pub execution_status: ExecutionStatus,
    /// When the simulation ran.
    pub executed_at: String,
    /// Human-readable simulation outcome.
    pub simulation_details: String,
}

/// Minimal view of any stored healing action, used by safety scans.
///
/// Fields are kept as raw strings since rows may have been written by
/// something other than this pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedAction {
    /// Action identifier.
    pub id: String,
    /// Stored action type label.
    pub action_type: String,
    /// Stored execution mode label.
    pub execution_mode: String,
    /// Stored executor label.
    pub executed_by: String,
}

/// Human disposition of a review that starts out PENDING.
pub const ADMIN_ACTION_PENDING: &str = "PENDING";

/// An admin review package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminReview {
    /// Review identifier.
    pub id: String,
    /// ADMIN_REVIEW decision this review belongs to.
    pub decision_id: String,
    /// Human disposition; starts as [`ADMIN_ACTION_PENDING`].
    pub admin_action: String,
    /// Human comment.
    pub admin_comment: Option<String>,
    /// Whether the human overrode the decision.
    pub override_flag: bool,
    /// Review priority.
    pub priority: Priority,
    /// Playbook for the reviewer.
    pub recommendations: Recommendations,
    /// Reason the issue was escalated (the decision reason).
    pub escalation_reason: String,
    /// Snapshot of the issue at review time.
    pub issue_context: serde_json::Value,
    /// When the review was created or last acted on.
    pub reviewed_at: String,
}

/// Fields a human reviewer may set on an existing review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminDisposition {
    /// Action taken (e.g. "APPROVED", "REJECTED").
    pub admin_action: String,
    /// Optional comment.
    pub admin_comment: Option<String>,
    /// Whether this overrides the original decision.
    pub override_flag: bool,
}

/// A pending review joined with its decision and issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReview {
    /// Review identifier.
    pub review_id: String,
    /// Decision identifier.
    pub decision_id: String,
    /// Current admin action.
    pub admin_action: String,
    /// Stored priority label.
    pub priority: String,
    /// When the review was created.
    pub reviewed_at: String,
    /// Issue identifier.
    pub issue_id: String,
    /// Decision reason.
    pub decision_reason: String,
    /// Raw issue type label.
    pub issue_type: String,
    /// Detecting component.
    pub detection_source: String,
    /// Metric value.
    pub raw_metric_value: Option<f64>,
    /// Metric unit.
    pub raw_metric_unit: Option<String>,
    /// When the issue was detected.
    pub detected_at: String,
}

// ---------------------------------------------------------------------------
// Aggregate rows
// ---------------------------------------------------------------------------

/// Decisions grouped by type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTypeRow {
    /// Stored decision type label.
    pub decision_type: String,
    /// Number of decisions.
    pub count: i64,
    /// Average confidence.
    pub avg_confidence: Option<f64>,
    /// Earliest decision timestamp.
    pub first_decision: Option<String>,
    /// Latest decision timestamp.
    pub last_decision: Option<String>,
}

/// Healing actions grouped by action type and status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingStatRow {
    /// Stored action type label.
    pub action_type: String,
    /// Stored status label.
    pub execution_status: String,
    /// Number of actions.
    pub count: i64,
}

/// Admin reviews grouped by admin action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewActionRow {
    /// Stored admin action.
    pub admin_action: String,
    /// Number of reviews.
    pub count: i64,
    /// Earliest review timestamp.
    pub first_review: Option<String>,
    /// Latest review timestamp.
    pub last_review: Option<String>,
}

/// Learning records grouped by issue type and action type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStatRow {
    /// Issue type.
    pub issue_type: String,
    /// Action type.
    pub action_type: String,
    /// Number of records.
    pub total_records: i64,
    /// Average confidence before.
    pub avg_confidence_before: Option<f64>,
    /// Average confidence after.
    pub avg_confidence_after: Option<f64>,
    /// Average of `after - before`.
    pub avg_improvement: Option<f64>,
    /// Records with outcome RESOLVED.
    pub successful_outcomes: i64,
}

/// Raw integrity counters over issues and decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityCounts {
    /// Issues with no decision.
    pub issues_without_decisions: i64,
    /// Decisions whose issue does not exist.
    pub decisions_without_issues: i64,
    /// Decisions with an unknown decision type.
    pub invalid_decision_types: i64,
    /// Decisions with confidence outside `[0, 1]`.
    pub confidence_out_of_range: i64,
}

impl IntegrityCounts {
    /// True when no counter is non-zero.
    pub fn is_clean(&self) -> bool {
        self.issues_without_decisions == 0
            && self.decisions_without_issues == 0
            && self.invalid_decision_types == 0
            && self.confidence_out_of_range == 0
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Read-only query capability.
#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Issues with no decision, oldest detection first.
    async fn unprocessed_issues(&self) -> Result<Vec<Issue>, StoreError>;

    /// Prior RETRY_OPERATION actions recorded for an issue.
    async fn retry_count_for_issue(&self, issue_id: &str) -> Result<u32, StoreError>;

    /// AUTO_HEAL decisions with no healing action, oldest decision first.
    async fn unhealed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError>;

    /// ADMIN_REVIEW decisions with no review, oldest decision first.
    async fn unreviewed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError>;

    /// The decision recorded for an issue, if any.
    async fn decision_for_issue(&self, issue_id: &str) -> Result<Option<Decision>, StoreError>;

    /// A single review by identifier.
    async fn admin_review(&self, review_id: &str) -> Result<Option<AdminReview>, StoreError>;

    /// Reviews still awaiting a human, oldest first.
    async fn pending_reviews(&self) -> Result<Vec<PendingReview>, StoreError>;

    /// Every stored healing action.
    async fn recorded_actions(&self) -> Result<Vec<RecordedAction>, StoreError>;

    /// Integrity counters over issues and decisions.
    async fn integrity_counts(&self) -> Result<IntegrityCounts, StoreError>;

    /// Decisions grouped by type.
    async fn decision_type_stats(&self) -> Result<Vec<DecisionTypeRow>, StoreError>;

    /// Healing actions recorded by `executed_by`, grouped by type and status.
    async fn healing_stats(&self, executed_by: &str) -> Result<Vec<HealingStatRow>, StoreError>;

    /// Reviews grouped by admin action.
    async fn review_action_stats(&self) -> Result<Vec<ReviewActionRow>, StoreError>;

    /// Learning records grouped by issue and action type.
    async fn learning_stats(&self) -> Result<Vec<LearningStatRow>, StoreError>;
}

/// Narrow write capability over the audit tables.
#[async_trait]
pub trait WriteStore: Send + Sync {
    /// Record a decision. At most one per issue.
    async fn insert_decision(&self, decision: &Decision) -> Result<InsertOutcome, StoreError>;

    /// Record a healing action. At most one per decision.
    async fn insert_healing_action(
        &self,
        action: &HealingAction,
    ) -> Result<InsertOutcome, StoreError>;

    /// Record an admin review. At most one per decision.
    async fn insert_admin_review(&self, review: &AdminReview)
        -> Result<InsertOutcome, StoreError>;

    /// Apply a human disposition to a review. Returns `false` if no review matched.
    async fn update_admin_review(
        &self,
        review_id: &str,
        disposition: &AdminDisposition,
    ) -> Result<bool, StoreError>;
}

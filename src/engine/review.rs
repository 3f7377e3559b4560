//! Admin review engine: packages every ADMIN_REVIEW decision for a human.
//!
//! A review carries a priority, a per-issue-type playbook, the escalation
//! reason, and a snapshot of the issue. It is created PENDING; only a
//! reviewer changes it afterwards, through [`ReviewEngine::simulate_admin_action`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{EngineError, ItemError};
use crate::rulebook::IssueType;
use crate::safety;
use crate::stats::ReviewStatistics;
use crate::store::{
    now_timestamp, table, AdminDisposition, AdminReview, InsertOutcome, PendingDecision, PendingReview,
    ReadStore, WriteStore, ADMIN_ACTION_PENDING,
};

/// Priority, effort, and urgency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Needs attention now.
    High,
    /// Needs attention soon.
    Medium,
    /// Can wait.
    Low,
}

impl Priority {
    /// Upper-case label as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// Parse a stored label (exact match).
    pub fn parse(label: &str) -> Option<Self> {
        [Self::High, Self::Medium, Self::Low]
            .into_iter()
            .find(|p| p.as_str() == label)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playbook handed to the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    /// The one thing to do first.
    pub primary_action: String,
    /// Follow-up actions.
    pub secondary_actions: Vec<String>,
    /// How to investigate.
    pub investigation_steps: Vec<String>,
    /// How to stop it happening again.
    pub prevention_measures: Vec<String>,
    /// Expected effort.
    pub estimated_effort: Priority,
    /// How soon it should be handled.
    pub urgency: Priority,
}

/// Outcome of one review pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewBatchResult {
    /// Decisions selected from the backlog.
    pub processed: usize,
    /// Reviews written.
    pub created: usize,
    /// Written reviews with HIGH priority.
    pub high_priority_count: usize,
    /// Decisions another pipeline reviewed first.
    pub skipped: usize,
    /// Per-decision failures.
    pub errors: Vec<ItemError>,
    /// Reviews written in this pass.
    pub reviews: Vec<AdminReview>,
}

/// Creates review packages for ADMIN_REVIEW decisions.
pub struct ReviewEngine {
    reader: Arc<dyn ReadStore>,
    writer: Arc<dyn WriteStore>,
}

impl ReviewEngine {
    /// Create an engine over the given store capabilities.
    pub fn new(reader: Arc<dyn ReadStore>, writer: Arc<dyn WriteStore>) -> Self {
        Self { reader, writer }
    }

    /// Create a review for every ADMIN_REVIEW decision without one, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backlog cannot be read. Per-decision
    /// failures are collected in [`ReviewBatchResult::errors`].
    pub async fn process_admin_review_decisions(&self) -> Result<ReviewBatchResult, EngineError> {
        let decisions = self.reader.unreviewed_decisions().await?;
        let mut result = ReviewBatchResult {
            processed: decisions.len(),
            ..ReviewBatchResult::default()
        };

        if decisions.is_empty() {
            debug!("no ADMIN_REVIEW decisions awaiting review");
            return Ok(result);
        }
        info!(count = decisions.len(), "processing ADMIN_REVIEW decisions");

        for decision in &decisions {
            let review = build_review(decision);
            match self.create_review(&review).await {
                Ok(InsertOutcome::Inserted) => {
                    info!(
                        decision_id = %decision.decision_id,
                        review_id = %review.id,
                        priority = %review.priority,
                        issue_type = %decision.issue_type,
                        "admin review created"
                    );
                    result.created = result.created.saturating_add(1);
                    if review.priority == Priority::High {
                        result.high_priority_count = result.high_priority_count.saturating_add(1);
                    }
                    result.reviews.push(review);
                }
                Ok(InsertOutcome::Duplicate) => {
                    debug!(decision_id = %decision.decision_id, "decision already reviewed elsewhere");
                    result.skipped = result.skipped.saturating_add(1);
                }
                Err(e) => {
                    warn!(decision_id = %decision.decision_id, error = %e, "failed to create admin review");
                    result
                        .errors
                        .push(ItemError::new(&decision.decision_id, &e));
                }
            }
        }

        info!(
            processed = result.processed,
            created = result.created,
            high_priority = result.high_priority_count,
            skipped = result.skipped,
            errors = result.errors.len(),
            "admin review pass complete"
        );
        Ok(result)
    }

    async fn create_review(&self, review: &AdminReview) -> Result<InsertOutcome, EngineError> {
        safety::validate_write("INSERT", table::ADMIN_REVIEWS)?;
        Ok(self.writer.insert_admin_review(review).await?)
    }

    /// Reviews still awaiting a human, with issue context.
    ///
    /// # Errors
    ///
    /// Returns an error if the reviews cannot be read.
    pub async fn pending_reviews(&self) -> Result<Vec<PendingReview>, EngineError> {
        Ok(self.reader.pending_reviews().await?)
    }

    /// Record a reviewer's disposition. Returns `false` if no review matched.
    ///
    /// The action label is trimmed and upper-cased.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is empty or the update fails.
    pub async fn simulate_admin_action(
        &self,
        review_id: &str,
        action: &str,
        comment: Option<&str>,
        override_flag: bool,
    ) -> Result<bool, EngineError> {
        let admin_action = action.trim().to_uppercase();
        if admin_action.is_empty() {
            return Err(EngineError::EmptyAdminAction);
        }

        let disposition = AdminDisposition {
            admin_action,
            admin_comment: comment.map(str::to_owned),
            override_flag,
        };
        safety::validate_write("UPDATE", table::ADMIN_REVIEWS)?;
        let matched = self
            .writer
            .update_admin_review(review_id, &disposition)
            .await?;
        if matched {
            info!(
                review_id,
                action = %disposition.admin_action,
                override_flag,
                "admin action recorded"
            );
        }
        Ok(matched)
    }

    /// Reviews grouped by disposition.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read.
    pub async fn statistics(&self) -> Result<ReviewStatistics, EngineError> {
        let rows = self.reader.review_action_stats().await?;
        Ok(ReviewStatistics::from_rows(rows))
    }
}

fn build_review(decision: &PendingDecision) -> AdminReview {
    let metric = decision.raw_metric_value;
    AdminReview {
        id: uuid::Uuid::new_v4().to_string(),
        decision_id: decision.decision_id.clone(),
        admin_action: ADMIN_ACTION_PENDING.to_owned(),
        admin_comment: None,
        override_flag: false,
        priority: determine_priority(&decision.issue_type, metric),
        recommendations: generate_recommendations(&decision.issue_type, metric),
        escalation_reason: decision.reason.clone(),
        issue_context: serde_json::json!({
            "issue_id": decision.issue_id,
            "issue_type": decision.issue_type,
            "detection_source": decision.detection_source,
            "metric_value": metric,
            "metric_unit": decision.raw_metric_unit,
            "detected_at": decision.detected_at,
            "decided_at": decision.decided_at,
            "decision_confidence": decision.confidence,
        }),
        reviewed_at: now_timestamp(),
    }
}

/// Review priority for an issue. Rules are checked in order; first match wins.
///
/// A missing metric counts as 0.
pub fn determine_priority(issue_type: &str, metric: Option<f64>) -> Priority {
    let metric = metric.unwrap_or(0.0);
    match IssueType::parse(issue_type) {
        Some(IssueType::TransactionFailure | IssueType::ConnectionOverload) => Priority::High,
        Some(IssueType::SlowQuery) if metric > 60.0 => Priority::High,
        Some(IssueType::LockWait) if metric > 30.0 => Priority::High,
        Some(IssueType::SlowQuery) if metric > 10.0 => Priority::Medium,
        Some(IssueType::LockWait) if metric > 5.0 => Priority::Medium,
        _ => Priority::Low,
    }
}

fn above(metric: f64, threshold: f64) -> Priority {
    if metric > threshold {
        Priority::High
    } else {
        Priority::Medium
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Playbook for an issue type, with effort and urgency scaled by the metric.
///
/// Types without a dedicated playbook get a generic investigation playbook.
pub fn generate_recommendations(issue_type: &str, metric: Option<f64>) -> Recommendations {
    let metric = metric.unwrap_or(0.0);
    match IssueType::parse(issue_type) {
        Some(IssueType::SlowQuery) => Recommendations {
            primary_action: "Analyze query execution plan and optimize".to_owned(),
            secondary_actions: strings(&[
                "Review table indexes",
                "Consider query rewriting",
                "Evaluate table statistics",
            ]),
            investigation_steps: strings(&[
                "Run EXPLAIN on the slow query",
                "Check for missing indexes",
                "Analyze table cardinality",
                "Review query patterns",
            ]),
            prevention_measures: strings(&[
                "Implement query performance monitoring",
                "Add appropriate indexes",
                "Set up query review process",
                "Consider query caching",
            ]),
            estimated_effort: above(metric, 30.0),
            urgency: above(metric, 60.0),
        },
        Some(IssueType::ConnectionOverload) => Recommendations {
            primary_action: "Analyze connection usage patterns and increase limits if needed"
                .to_owned(),
            secondary_actions: strings(&[
                "Implement connection pooling",
                "Review application connection management",
                "Consider connection timeout adjustments",
            ]),
            investigation_steps: strings(&[
                "Monitor connection patterns over time",
                "Identify applications with high connection usage",
                "Check for connection leaks",
                "Review max_connections setting",
            ]),
            prevention_measures: strings(&[
                "Implement proper connection pooling",
                "Set connection timeouts",
                "Monitor connection metrics",
                "Educate developers on connection best practices",
            ]),
            estimated_effort: Priority::Medium,
            urgency: above(metric, 80.0),
        },
        Some(IssueType::TransactionFailure) => Recommendations {
            primary_action: "Investigate root cause of transaction failures".to_owned(),
            secondary_actions: strings(&[
                "Review application error handling",
                "Check for resource constraints",
                "Analyze transaction patterns",
            ]),
            investigation_steps: strings(&[
                "Review database error logs",
                "Check for lock contention",
                "Analyze transaction isolation levels",
                "Monitor system resources",
            ]),
            prevention_measures: strings(&[
                "Implement proper error handling",
                "Optimize transaction scope",
                "Monitor transaction metrics",
                "Consider retry mechanisms",
            ]),
            estimated_effort: Priority::High,
            urgency: Priority::High,
        },
        Some(IssueType::LockWait) => Recommendations {
            primary_action: "Analyze lock contention patterns and optimize transaction design"
                .to_owned(),
            secondary_actions: strings(&[
                "Review transaction isolation levels",
                "Optimize query order in transactions",
                "Consider lock timeout adjustments",
            ]),
            investigation_steps: strings(&[
                "Monitor lock waits",
                "Analyze transaction patterns",
                "Check for long-running transactions",
                "Review application logic",
            ]),
            prevention_measures: strings(&[
                "Minimize transaction scope",
                "Use consistent lock ordering",
                "Implement timeout handling",
                "Monitor lock metrics",
            ]),
            estimated_effort: Priority::High,
            urgency: above(metric, 30.0),
        },
        // DEADLOCK only reaches review through rule drift.
        Some(IssueType::Deadlock) => generic_playbook(format!(
            "Investigate why {issue_type} was escalated instead of rolled back"
        )),
        None => generic_playbook(format!("Investigate unknown issue type: {issue_type}")),
    }
}

fn generic_playbook(primary_action: String) -> Recommendations {
    Recommendations {
        primary_action,
        secondary_actions: strings(&[
            "Review detection source logs",
            "Consult DBMS documentation",
            "Consider escalation to vendor support",
        ]),
        investigation_steps: strings(&[
            "Gather detailed system information",
            "Review recent system changes",
            "Check vendor documentation",
            "Consult with DBMS experts",
        ]),
        prevention_measures: strings(&[
            "Enhance monitoring coverage",
            "Update issue type definitions",
            "Improve detection rules",
        ]),
        estimated_effort: Priority::High,
        urgency: Priority::High,
    }
}

//! Decision engine: turns unprocessed issues into recorded decisions.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{EngineError, ItemError};
use crate::rulebook::{DecisionType, IssueType, MatchContext, Rule, Rulebook};
use crate::safety;
use crate::stats::DecisionStatistics;
use crate::store::{
    now_timestamp, table, Decision, InsertOutcome, IntegrityCounts, Issue, ReadStore, WriteStore,
};

/// Outcome of one decision pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionBatchResult {
    /// Issues selected from the backlog.
    pub processed: usize,
    /// Decisions written.
    pub created: usize,
    /// Written decisions of type AUTO_HEAL.
    pub auto_heal_count: usize,
    /// Written decisions of type ADMIN_REVIEW.
    pub admin_review_count: usize,
    /// Issues another pipeline decided first.
    pub skipped: usize,
    /// Per-issue failures.
    pub errors: Vec<ItemError>,
    /// Decisions written in this pass.
    pub decisions: Vec<Decision>,
}

/// Maps each unprocessed issue to exactly one decision.
pub struct DecisionEngine {
    rulebook: Arc<Rulebook>,
    reader: Arc<dyn ReadStore>,
    writer: Arc<dyn WriteStore>,
}

impl DecisionEngine {
    /// Create an engine over the given rulebook and store capabilities.
    pub fn new(
        rulebook: Arc<Rulebook>,
        reader: Arc<dyn ReadStore>,
        writer: Arc<dyn WriteStore>,
    ) -> Self {
        Self {
            rulebook,
            reader,
            writer,
        }
    }

    /// Decide every issue that has no decision yet, oldest detection first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backlog cannot be read. Per-issue
    /// failures are collected in [`DecisionBatchResult::errors`].
    pub async fn process_new_issues(&self) -> Result<DecisionBatchResult, EngineError> {
        let issues = self.reader.unprocessed_issues().await?;
        let mut result = DecisionBatchResult {
            processed: issues.len(),
            ..DecisionBatchResult::default()
        };

        if issues.is_empty() {
            debug!("no unprocessed issues");
            return Ok(result);
        }
        info!(count = issues.len(), "processing unprocessed issues");

        for issue in &issues {
            match self.process_issue(issue).await {
                Ok((decision, InsertOutcome::Inserted)) => {
                    info!(
                        issue_id = %issue.id,
                        decision_id = %decision.id,
                        decision_type = %decision.decision_type,
                        confidence = decision.confidence,
                        "decision recorded"
                    );
                    result.created = result.created.saturating_add(1);
                    match decision.decision_type {
                        DecisionType::AutoHeal => {
                            result.auto_heal_count = result.auto_heal_count.saturating_add(1);
                        }
                        DecisionType::AdminReview => {
                            result.admin_review_count =
                                result.admin_review_count.saturating_add(1);
                        }
                        DecisionType::Escalated => {}
                    }
                    result.decisions.push(decision);
                }
                Ok((_, InsertOutcome::Duplicate)) => {
                    debug!(issue_id = %issue.id, "issue already decided elsewhere");
                    result.skipped = result.skipped.saturating_add(1);
                }
                Err(e) => {
                    warn!(issue_id = %issue.id, error = %e, "failed to decide issue");
                    result.errors.push(ItemError::new(&issue.id, &e));
                }
            }
        }

        info!(
            processed = result.processed,
            created = result.created,
            auto_heal = result.auto_heal_count,
            admin_review = result.admin_review_count,
            skipped = result.skipped,
            errors = result.errors.len(),
            "decision pass complete"
        );
        Ok(result)
    }

    async fn process_issue(&self, issue: &Issue) -> Result<(Decision, InsertOutcome), EngineError> {
        let context = self.build_context(issue).await?;
        let rule = self.rulebook.match_issue(&issue.issue_type, &context);
        let decision = make_decision(&rule, issue, &context);
        safety::validate_write("INSERT", table::DECISION_LOG)?;
        let outcome = self.writer.insert_decision(&decision).await?;
        Ok((decision, outcome))
    }

    /// Gather the issue-type-specific context the rulebook is evaluated against.
    ///
    /// # Errors
    ///
    /// Returns an error if the prior retry count cannot be read.
    pub async fn build_context(&self, issue: &Issue) -> Result<MatchContext, EngineError> {
        let metric = issue.raw_metric_value.unwrap_or(0.0);
        let mut context = MatchContext::default();

        match IssueType::parse(&issue.issue_type) {
            Some(IssueType::LockWait) => context.timeout_seconds = Some(metric),
            Some(IssueType::TransactionFailure) => {
                context.retry_count = Some(self.reader.retry_count_for_issue(&issue.id).await?);
            }
            Some(IssueType::ConnectionOverload) => {
                #[allow(clippy::cast_possible_truncation)]
                let connections = metric as i64;
                context.connection_count = Some(connections);
            }
            Some(IssueType::Deadlock | IssueType::SlowQuery) | None => {}
        }

        Ok(context)
    }

    /// Count issues without decisions, orphaned decisions, invalid decision
    /// types, and out-of-range confidences.
    ///
    /// # Errors
    ///
    /// Returns an error if the counts cannot be read.
    pub async fn validate_decision_integrity(&self) -> Result<IntegrityCounts, EngineError> {
        let counts = self.reader.integrity_counts().await?;
        if !counts.is_clean() {
            warn!(
                issues_without_decisions = counts.issues_without_decisions,
                decisions_without_issues = counts.decisions_without_issues,
                invalid_decision_types = counts.invalid_decision_types,
                confidence_out_of_range = counts.confidence_out_of_range,
                "decision integrity check found problems"
            );
        }
        Ok(counts)
    }

    /// Decisions grouped by type.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read.
    pub async fn statistics(&self) -> Result<DecisionStatistics, EngineError> {
        let rows = self.reader.decision_type_stats().await?;
        Ok(DecisionStatistics::from_rows(rows))
    }
}

/// Build a decision from a matched rule.
///
/// The reason carries the rule's base reason followed by every context
/// value used, the raw metric, and the detection source.
pub fn make_decision(rule: &Rule, issue: &Issue, context: &MatchContext) -> Decision {
    Decision {
        id: uuid::Uuid::new_v4().to_string(),
        issue_id: issue.id.clone(),
        decision_type: rule.decision_type,
        reason: decision_reason(rule, issue, context),
        confidence: rule.confidence,
        decided_at: now_timestamp(),
    }
}

/// Render the audit-trail reason for a decision.
pub fn decision_reason(rule: &Rule, issue: &Issue, context: &MatchContext) -> String {
    let mut details = Vec::new();

    if let Some(retry_count) = context.retry_count {
        details.push(format!("retry_count={retry_count}"));
    }
    if let Some(timeout) = context.timeout_seconds {
        details.push(format!("timeout={timeout}s"));
    }
    if let Some(connections) = context.connection_count {
        details.push(format!("connections={connections}"));
    }
    if let Some(value) = issue.raw_metric_value {
        match issue.raw_metric_unit.as_deref().filter(|u| !u.is_empty()) {
            Some(unit) => details.push(format!("metric={value} {unit}")),
            None => details.push(format!("metric={value}")),
        }
    }
    details.push(format!("source={}", issue.detection_source));

    format!("{} ({})", rule.reason, details.join(", "))
}

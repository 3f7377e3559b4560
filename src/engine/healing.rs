//! Healing engine: records a simulated remediation for every AUTO_HEAL decision.
//!
//! Nothing here touches a live database. Each action is a deterministic
//! simulation keyed on the decision id, so replaying a decision always
//! yields the same status and detail text.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::{EngineError, ItemError};
use crate::rulebook::{
    ActionType, DecisionType, ExecutionMode, ExecutionStatus, IssueType, MatchContext, Rulebook,
    MAX_RETRY_COUNT,
};
use crate::safety;
use crate::stats::HealingStatistics;
use crate::store::{
    now_timestamp, table, HealingAction, InsertOutcome, PendingDecision, ReadStore, WriteStore,
};

/// Outcome of one healing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealingBatchResult {
    /// Decisions selected from the backlog.
    pub processed: usize,
    /// Actions written.
    pub executed: usize,
    /// Written actions with status SUCCESS.
    pub succeeded: usize,
    /// Written actions with status FAILED.
    pub failed: usize,
    /// Decisions another pipeline healed first.
    pub skipped: usize,
    /// Per-decision failures.
    pub errors: Vec<ItemError>,
    /// Actions written in this pass.
    pub actions: Vec<HealingAction>,
}

/// Status and detail text of a simulated action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationOutcome {
    /// Simulated status.
    pub status: ExecutionStatus,
    /// Human-readable outcome.
    pub details: String,
}

impl SimulationOutcome {
    fn success(details: String) -> Self {
        Self {
            status: ExecutionStatus::Success,
            details,
        }
    }

    fn failed(details: String) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            details,
        }
    }
}

/// A recorded action that breaks the simulation-only guarantee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionViolation {
    /// Offending action.
    pub action_id: String,
    /// Stored action type.
    pub action_type: String,
    /// Stored execution mode.
    pub execution_mode: String,
    /// What is wrong with it.
    pub violation: String,
}

/// Scan of every recorded healing action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingSafetyReport {
    /// When the scan ran.
    pub checked_at: String,
    /// Actions scanned.
    pub total_actions: usize,
    /// Actions recorded as SIMULATED.
    pub simulated_actions: usize,
    /// Actions recorded with any other mode.
    pub unsafe_actions: usize,
    /// Individual findings.
    pub violations: Vec<ActionViolation>,
    /// True when there are no findings.
    pub is_safe: bool,
}

/// Simulates remediation for AUTO_HEAL decisions.
pub struct HealingEngine {
    rulebook: Arc<Rulebook>,
    reader: Arc<dyn ReadStore>,
    writer: Arc<dyn WriteStore>,
    executed_by: String,
}

impl HealingEngine {
    /// Create an engine that labels its actions with `executed_by`.
    pub fn new(
        rulebook: Arc<Rulebook>,
        reader: Arc<dyn ReadStore>,
        writer: Arc<dyn WriteStore>,
        executed_by: impl Into<String>,
    ) -> Self {
        Self {
            rulebook,
            reader,
            writer,
            executed_by: executed_by.into(),
        }
    }

    /// Simulate an action for every AUTO_HEAL decision without one, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backlog cannot be read. Per-decision
    /// failures are collected in [`HealingBatchResult::errors`].
    pub async fn process_auto_heal_decisions(&self) -> Result<HealingBatchResult, EngineError> {
        let decisions = self.reader.unhealed_decisions().await?;
        let mut result = HealingBatchResult {
            processed: decisions.len(),
            ..HealingBatchResult::default()
        };

        if decisions.is_empty() {
            debug!("no AUTO_HEAL decisions awaiting healing");
            return Ok(result);
        }
        info!(count = decisions.len(), "processing AUTO_HEAL decisions");

        for decision in &decisions {
            match self.heal(decision).await {
                Ok((action, InsertOutcome::Inserted)) => {
                    info!(
                        decision_id = %decision.decision_id,
                        action_type = %action.action_type,
                        status = %action.execution_status,
                        "simulated healing action recorded"
                    );
                    result.executed = result.executed.saturating_add(1);
                    match action.execution_status {
                        ExecutionStatus::Success => {
                            result.succeeded = result.succeeded.saturating_add(1);
                        }
                        ExecutionStatus::Failed => {
                            result.failed = result.failed.saturating_add(1);
                        }
                        ExecutionStatus::Pending | ExecutionStatus::Simulated => {}
                    }
                    result.actions.push(action);
                }
                Ok((_, InsertOutcome::Duplicate)) => {
                    debug!(decision_id = %decision.decision_id, "decision already healed elsewhere");
                    result.skipped = result.skipped.saturating_add(1);
                }
                Err(e) => {
                    warn!(decision_id = %decision.decision_id, error = %e, "failed to heal decision");
                    result
                        .errors
                        .push(ItemError::new(&decision.decision_id, &e));
                }
            }
        }

        info!(
            processed = result.processed,
            executed = result.executed,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            errors = result.errors.len(),
            "healing pass complete"
        );
        Ok(result)
    }

    async fn heal(
        &self,
        decision: &PendingDecision,
    ) -> Result<(HealingAction, InsertOutcome), EngineError> {
        // Decisions and rules can drift; re-resolve before acting.
        let rule = self
            .rulebook
            .match_issue(&decision.issue_type, &MatchContext::default());
        if rule.decision_type != DecisionType::AutoHeal {
            return Err(EngineError::RuleMismatch {
                decision_id: decision.decision_id.clone(),
                issue_type: decision.issue_type.clone(),
                resolved: rule.decision_type,
                expected: DecisionType::AutoHeal,
            });
        }

        let max_retries = IssueType::parse(&decision.issue_type)
            .map_or(MAX_RETRY_COUNT, |t| self.rulebook.max_retries(t));
        let simulation = simulate_action(rule.action_type, decision, max_retries);

        let action = HealingAction {
            id: uuid::Uuid::new_v4().to_string(),
            decision_id: decision.decision_id.clone(),
            action_type: rule.action_type,
            execution_mode: ExecutionMode::Simulated,
            executed_by: self.executed_by.clone(),
            execution_status: simulation.status,
            executed_at: now_timestamp(),
            simulation_details: simulation.details,
        };

        safety::validate_healing_action(
            action.action_type.as_str(),
            action.execution_mode.as_str(),
        )?;
        safety::validate_write("INSERT", table::HEALING_ACTIONS)?;

        let outcome = self.writer.insert_healing_action(&action).await?;
        Ok((action, outcome))
    }

    /// Scan every recorded action for anything not simulated.
    ///
    /// # Errors
    ///
    /// Returns an error if the actions cannot be read.
    pub async fn validate_healing_safety(&self) -> Result<HealingSafetyReport, EngineError> {
        let actions = self.reader.recorded_actions().await?;
        let mut report = HealingSafetyReport {
            checked_at: now_timestamp(),
            total_actions: actions.len(),
            simulated_actions: 0,
            unsafe_actions: 0,
            violations: Vec::new(),
            is_safe: true,
        };

        for action in &actions {
            if action.execution_mode == ExecutionMode::Simulated.as_str() {
                report.simulated_actions = report.simulated_actions.saturating_add(1);
            } else {
                report.unsafe_actions = report.unsafe_actions.saturating_add(1);
                report.violations.push(ActionViolation {
                    action_id: action.id.clone(),
                    action_type: action.action_type.clone(),
                    execution_mode: action.execution_mode.clone(),
                    violation: format!("Non-simulated execution mode: {}", action.execution_mode),
                });
            }

            if let Err(violation) =
                safety::validate_healing_action(&action.action_type, &action.execution_mode)
            {
                report.violations.push(ActionViolation {
                    action_id: action.id.clone(),
                    action_type: action.action_type.clone(),
                    execution_mode: action.execution_mode.clone(),
                    violation: violation.to_string(),
                });
            }
        }

        report.is_safe = report.violations.is_empty();
        if !report.is_safe {
            error!(
                unsafe_actions = report.unsafe_actions,
                violations = report.violations.len(),
                "recorded healing actions violate simulation-only policy"
            );
        }
        Ok(report)
    }

    /// Actions recorded by this engine, grouped by type and status.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read.
    pub async fn statistics(&self) -> Result<HealingStatistics, EngineError> {
        let rows = self.reader.healing_stats(&self.executed_by).await?;
        Ok(HealingStatistics::from_rows(&self.executed_by, &rows))
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

fn digest(decision_id: &str) -> [u8; 32] {
    let hash = Sha256::digest(decision_id.as_bytes());
    let mut out = [0_u8; 32];
    out.copy_from_slice(&hash);
    out
}

/// Seed for the decision's pseudo-random draws: the first eight bytes of
/// SHA-256 over the decision id, big-endian.
pub fn simulation_seed(decision_id: &str) -> u64 {
    let hash = digest(decision_id);
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(bytes)
}

/// Prior retries assumed for a decision, in `0..=2`, from the second
/// eight bytes of its hash.
pub fn simulated_retry_count(decision_id: &str) -> u32 {
    let hash = digest(decision_id);
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&hash[8..16]);
    let count = u64::from_be_bytes(bytes).checked_rem(3).unwrap_or(0);
    u32::try_from(count).unwrap_or(0)
}

/// Rollback success probability for a decision confidence.
pub fn rollback_success_probability(confidence: f64) -> f64 {
    if confidence >= 0.9 {
        0.95
    } else if confidence >= 0.8 {
        0.85
    } else {
        0.70
    }
}

/// Retry success probability after `retry_count` prior attempts, floored at 0.5.
pub fn retry_success_probability(retry_count: u32) -> f64 {
    (0.9 - 0.2 * f64::from(retry_count)).max(0.5)
}

fn draw(seed: u64) -> f64 {
    StdRng::seed_from_u64(seed).gen::<f64>()
}

/// Simulate `action_type` for a decision.
///
/// Deterministic in the decision id and fields: the same input always
/// yields the same outcome.
pub fn simulate_action(
    action_type: ActionType,
    decision: &PendingDecision,
    max_retries: u32,
) -> SimulationOutcome {
    match action_type {
        ActionType::RollbackTransaction => simulate_rollback(decision),
        ActionType::RetryOperation => simulate_retry(decision, max_retries),
        ActionType::KillConnection => {
            #[allow(clippy::cast_possible_truncation)]
            let connections = decision.raw_metric_value.unwrap_or(0.0) as i64;
            SimulationOutcome::success(format!(
                "SIMULATED: Would terminate connection (current count: {connections}) - NEVER actually executed"
            ))
        }
        ActionType::OptimizeQuery => {
            let execution_time = decision.raw_metric_value.unwrap_or(0.0);
            SimulationOutcome::success(format!(
                "SIMULATED: Query optimization recommended (execution time: {execution_time}s) - requires admin review"
            ))
        }
        ActionType::None => SimulationOutcome::success(
            "No action required - escalated to admin review".to_owned(),
        ),
    }
}

fn simulate_rollback(decision: &PendingDecision) -> SimulationOutcome {
    let probability = rollback_success_probability(decision.confidence);
    if draw(simulation_seed(&decision.decision_id)) < probability {
        SimulationOutcome::success(format!(
            "SIMULATED: Transaction rollback successful (confidence: {:.2})",
            decision.confidence
        ))
    } else {
        SimulationOutcome::failed(
            "SIMULATED: Transaction rollback failed - would require manual intervention"
                .to_owned(),
        )
    }
}

fn simulate_retry(decision: &PendingDecision, max_retries: u32) -> SimulationOutcome {
    let retry_count = simulated_retry_count(&decision.decision_id);
    if retry_count >= max_retries {
        return SimulationOutcome::failed(format!(
            "SIMULATED: Max retries ({max_retries}) exceeded - escalating to admin"
        ));
    }

    let backoff = 2_u64.saturating_pow(retry_count);
    let attempt = retry_count.saturating_add(1);
    let seed = simulation_seed(&decision.decision_id).wrapping_add(u64::from(retry_count));

    if draw(seed) < retry_success_probability(retry_count) {
        SimulationOutcome::success(format!(
            "SIMULATED: Retry #{attempt} successful after {backoff}s backoff"
        ))
    } else {
        SimulationOutcome::failed(format!(
            "SIMULATED: Retry #{attempt} failed - will retry with {}s backoff",
            backoff.saturating_mul(2)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_probability_is_floored() {
        assert!((retry_success_probability(0) - 0.9).abs() < 1e-9);
        assert!((retry_success_probability(1) - 0.7).abs() < 1e-9);
        assert!((retry_success_probability(2) - 0.5).abs() < 1e-9);
        assert!((retry_success_probability(5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn simulated_retry_count_is_bounded() {
        for i in 0..50 {
            assert!(simulated_retry_count(&format!("decision-{i}")) <= 2);
        }
    }
}

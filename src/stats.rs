//! Per-engine statistics for the presentation layer.
//!
//! Each engine queries grouped rows through its [`ReadStore`](crate::store::ReadStore)
//! and folds them here into totals and rates.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::rulebook::ExecutionStatus;
use crate::store::{
    DecisionTypeRow, HealingStatRow, LearningStatRow, ReviewActionRow, ADMIN_ACTION_PENDING,
};

/// Decisions grouped by type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionStatistics {
    /// Total decisions across all types.
    pub total_decisions: i64,
    /// Count-weighted average confidence, 0.0 if there are no decisions.
    pub average_confidence: f64,
    /// Per-type breakdown.
    pub by_type: Vec<DecisionTypeRow>,
}

impl DecisionStatistics {
    /// Fold grouped rows into totals.
    pub fn from_rows(rows: Vec<DecisionTypeRow>) -> Self {
        let total_decisions = rows
            .iter()
            .fold(0_i64, |acc, row| acc.saturating_add(row.count));

        #[allow(clippy::cast_precision_loss)]
        let weighted: f64 = rows
            .iter()
            .map(|row| row.avg_confidence.unwrap_or(0.0) * row.count as f64)
            .sum();

        #[allow(clippy::cast_precision_loss)]
        let average_confidence = if total_decisions > 0 {
            weighted / total_decisions as f64
        } else {
            0.0
        };

        Self {
            total_decisions,
            average_confidence,
            by_type: rows,
        }
    }
}

/// Healing actions grouped by type and status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingStatistics {
    /// Executor the statistics are filtered on.
    pub executed_by: String,
    /// Total actions.
    pub total_actions: i64,
    /// Actions with status SUCCESS.
    pub successful_actions: i64,
    /// Success rate in percent, 0.0 if there are no actions.
    pub success_rate: f64,
    /// Counts per status label.
    pub by_status: BTreeMap<String, i64>,
    /// Counts per action type, then per status label.
    pub by_action_type: BTreeMap<String, BTreeMap<String, i64>>,
}

impl HealingStatistics {
    /// Fold grouped rows into totals.
    pub fn from_rows(executed_by: &str, rows: &[HealingStatRow]) -> Self {
        let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_action_type: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        let mut total_actions: i64 = 0;

        for row in rows {
            total_actions = total_actions.saturating_add(row.count);
            let status = by_status.entry(row.execution_status.clone()).or_default();
            *status = status.saturating_add(row.count);
            let per_action = by_action_type
                .entry(row.action_type.clone())
                .or_default()
                .entry(row.execution_status.clone())
                .or_default();
            *per_action = per_action.saturating_add(row.count);
        }

        let successful_actions = by_status
            .get(ExecutionStatus::Success.as_str())
            .copied()
            .unwrap_or(0);

        Self {
            executed_by: executed_by.to_owned(),
            total_actions,
            successful_actions,
            success_rate: percent(successful_actions, total_actions),
            by_status,
            by_action_type,
        }
    }
}

/// Admin reviews grouped by disposition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewStatistics {
    /// Total reviews.
    pub total_reviews: i64,
    /// Reviews still PENDING.
    pub pending_reviews: i64,
    /// Reviews a human has acted on.
    pub completed_reviews: i64,
    /// Per-action breakdown.
    pub by_action: Vec<ReviewActionRow>,
}

impl ReviewStatistics {
    /// Fold grouped rows into totals.
    pub fn from_rows(rows: Vec<ReviewActionRow>) -> Self {
        let total_reviews = rows
            .iter()
            .fold(0_i64, |acc, row| acc.saturating_add(row.count));
        let pending_reviews = rows
            .iter()
            .filter(|row| row.admin_action == ADMIN_ACTION_PENDING)
            .fold(0_i64, |acc, row| acc.saturating_add(row.count));

        Self {
            total_reviews,
            pending_reviews,
            completed_reviews: total_reviews.saturating_sub(pending_reviews),
            by_action: rows,
        }
    }
}

/// Learning outcomes grouped by issue and action type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStatistics {
    /// Total records.
    pub total_records: i64,
    /// Records with outcome RESOLVED.
    pub successful_outcomes: i64,
    /// Per (issue type, action type) breakdown.
    pub by_pattern: Vec<LearningStatRow>,
}

impl LearningStatistics {
    /// Fold grouped rows into totals.
    pub fn from_rows(rows: Vec<LearningStatRow>) -> Self {
        let (total_records, successful_outcomes) =
            rows.iter().fold((0_i64, 0_i64), |(total, ok), row| {
                (
                    total.saturating_add(row.total_records),
                    ok.saturating_add(row.successful_outcomes),
                )
            });

        Self {
            total_records,
            successful_outcomes,
            by_pattern: rows,
        }
    }
}

/// `part / whole` in percent, 0.0 when `whole` is zero.
pub fn percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = part as f64 / whole as f64;
    ratio * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_zero_is_zero() {
        assert!((percent(3, 0) - 0.0).abs() < f64::EPSILON);
        assert!((percent(1, 4) - 25.0).abs() < f64::EPSILON);
    }
}

//! The three processing engines and their shared error vocabulary.
//!
//! Each engine selects its own backlog through a [`ReadStore`](crate::store::ReadStore),
//! processes items oldest first, and isolates per-item failures in the
//! batch result. An `Err` from a `process_*` call means the whole stage
//! failed (for example the backlog query itself).

use serde::Serialize;

use crate::rulebook::DecisionType;
use crate::safety::SafetyViolation;
use crate::store::StoreError;

pub mod decision;
pub mod healing;
pub mod review;

/// Errors raised while processing a stage or a single item.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Storage failed or rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A guard rejected the operation.
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
    /// The rule re-resolved for a decision no longer matches it.
    #[error("decision {decision_id}: rule for {issue_type} resolves to {resolved}, expected {expected}")]
    RuleMismatch {
        /// Decision being processed.
        decision_id: String,
        /// Raw issue type label.
        issue_type: String,
        /// Decision type the current rule yields.
        resolved: DecisionType,
        /// Decision type the engine requires.
        expected: DecisionType,
    },
    /// A reviewer disposition was empty.
    #[error("admin action must not be empty")]
    EmptyAdminAction,
}

/// A per-item failure recorded in a batch result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    /// Issue, decision, or review the failure belongs to.
    pub item_id: String,
    /// Rendered error.
    pub message: String,
}

impl ItemError {
    fn new(item_id: &str, error: &EngineError) -> Self {
        Self {
            item_id: item_id.to_owned(),
            message: error.to_string(),
        }
    }
}

//! The healing rulebook: a fixed, validated mapping from issue type to
//! resolution rule.
//!
//! The registry is built once by [`Rulebook::initialize`] and is read-only
//! afterwards. Matching never fails: unknown issue types and conditional
//! rules whose thresholds are violated degrade to a synthetic ADMIN_REVIEW
//! rule so that a human always sees the issue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of retries before a retryable issue needs a human.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Lock waits longer than this many seconds indicate a design problem.
pub const LOCK_WAIT_TIMEOUT_THRESHOLD: f64 = 30.0;

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// Issue types the rulebook has rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    /// Two or more transactions waiting on each other.
    Deadlock,
    /// Query exceeding its expected execution time.
    SlowQuery,
    /// Connection count near or above the server limit.
    ConnectionOverload,
    /// Transaction aborted by the server.
    TransactionFailure,
    /// Transaction blocked waiting for a row or table lock.
    LockWait,
}

impl IssueType {
    /// Every declared issue type, in rulebook order.
    pub const ALL: [IssueType; 5] = [
        Self::Deadlock,
        Self::SlowQuery,
        Self::ConnectionOverload,
        Self::TransactionFailure,
        Self::LockWait,
    ];

    /// Canonical upper-case label as stored in `detected_issues.issue_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deadlock => "DEADLOCK",
            Self::SlowQuery => "SLOW_QUERY",
            Self::ConnectionOverload => "CONNECTION_OVERLOAD",
            Self::TransactionFailure => "TRANSACTION_FAILURE",
            Self::LockWait => "LOCK_WAIT",
        }
    }

    /// Parse a stored label (exact match).
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == label)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome category of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    /// The system may remediate on its own (always simulated).
    AutoHeal,
    /// A human must look at the issue.
    AdminReview,
    /// Escalated beyond the admin queue.
    Escalated,
}

impl DecisionType {
    /// Every valid decision type.
    pub const ALL: [DecisionType; 3] = [Self::AutoHeal, Self::AdminReview, Self::Escalated];

    /// Label as stored in `decision_log.decision_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoHeal => "AUTO_HEAL",
            Self::AdminReview => "ADMIN_REVIEW",
            Self::Escalated => "ESCALATED",
        }
    }

    /// Parse a stored label (exact match).
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == label)
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation a rule prescribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Roll back the deadlock victim.
    RollbackTransaction,
    /// Retry the failed operation with exponential backoff.
    RetryOperation,
    /// Nothing to execute.
    None,
    /// Terminate a connection. Simulated only.
    KillConnection,
    /// Recommend query optimization. Recommendation only.
    OptimizeQuery,
}

impl ActionType {
    /// Label as stored in `healing_actions.action_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RollbackTransaction => "ROLLBACK_TRANSACTION",
            Self::RetryOperation => "RETRY_OPERATION",
            Self::None => "NONE",
            Self::KillConnection => "KILL_CONNECTION",
            Self::OptimizeQuery => "OPTIMIZE_QUERY",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an action is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Executed by the system against the live database.
    Automatic,
    /// Executed by a human operator.
    Manual,
    /// Recorded simulation; no side effect outside the audit tables.
    Simulated,
}

impl ExecutionMode {
    /// Label as stored in `healing_actions.execution_mode`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::Manual => "MANUAL",
            Self::Simulated => "SIMULATED",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a (simulated) healing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// The action achieved its goal.
    Success,
    /// The action did not achieve its goal.
    Failed,
    /// Not yet executed.
    Pending,
    /// Recorded without an outcome.
    Simulated,
}

impl ExecutionStatus {
    /// Label as stored in `healing_actions.execution_status`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Pending => "PENDING",
            Self::Simulated => "SIMULATED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rules and context
// ---------------------------------------------------------------------------

/// Named thresholds a conditional rule is re-evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// The rule holds only while `retry_count < max_retries`.
    pub max_retries: Option<u32>,
    /// The rule holds only while `timeout_seconds <= timeout_threshold`.
    pub timeout_threshold: Option<f64>,
}

/// A single resolution rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Issue type label the rule was matched for. Unknown labels are kept verbatim.
    pub issue_type: String,
    /// What kind of decision this rule produces.
    pub decision_type: DecisionType,
    /// Remediation prescribed.
    pub action_type: ActionType,
    /// How the remediation is carried out.
    pub execution_mode: ExecutionMode,
    /// Human-readable justification.
    pub reason: String,
    /// Confidence in the rule, within `[0, 1]`.
    pub confidence: f64,
    /// Thresholds for context-dependent rules.
    pub conditions: Option<RuleConditions>,
}

impl Rule {
    fn admin_review(issue_type: &str, reason: String) -> Self {
        Self {
            issue_type: issue_type.to_owned(),
            decision_type: DecisionType::AdminReview,
            action_type: ActionType::None,
            execution_mode: ExecutionMode::Manual,
            reason,
            confidence: 1.0,
            conditions: None,
        }
    }
}

/// Context values a conditional rule is evaluated against.
///
/// Absent values count as zero, so an empty context never trips a threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    /// Prior retry attempts for the issue.
    pub retry_count: Option<u32>,
    /// Observed lock wait in seconds.
    pub timeout_seconds: Option<f64>,
    /// Observed open connection count.
    pub connection_count: Option<i64>,
}

impl RuleConditions {
    /// Whether the context satisfies every threshold.
    pub fn are_met(&self, context: &MatchContext) -> bool {
        if let Some(max_retries) = self.max_retries {
            if context.retry_count.unwrap_or(0) >= max_retries {
                return false;
            }
        }
        if let Some(threshold) = self.timeout_threshold {
            if context.timeout_seconds.unwrap_or(0.0) > threshold {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Errors found while validating a rule set at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RulebookError {
    /// A declared issue type has no rule.
    #[error("missing rule for issue type {0}")]
    MissingRule(IssueType),
    /// More than one unconditional rule targets the same issue type.
    #[error("duplicate rule for issue type {0}")]
    DuplicateRule(IssueType),
    /// A rule's confidence is outside `[0, 1]`.
    #[error("invalid confidence for {issue_type}: {confidence}")]
    ConfidenceOutOfRange {
        /// Offending issue type.
        issue_type: IssueType,
        /// Offending confidence value.
        confidence: f64,
    },
    /// An AUTO_HEAL rule is not simulated.
    #[error("AUTO_HEAL rule for {issue_type} must be SIMULATED, got {execution_mode}")]
    UnsafeAutoHeal {
        /// Offending issue type.
        issue_type: IssueType,
        /// The execution mode it declared.
        execution_mode: ExecutionMode,
    },
}

/// Per-type entry of the [`RulebookSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct RuleDescription {
    /// Decision produced.
    pub decision_type: DecisionType,
    /// Action prescribed.
    pub action_type: ActionType,
    /// Execution mode declared.
    pub execution_mode: ExecutionMode,
    /// Justification.
    pub reason: String,
    /// Confidence.
    pub confidence: f64,
    /// Whether the rule is re-evaluated against context.
    pub has_conditions: bool,
}

/// Documentation view of the rulebook, used by status and audit reports.
#[derive(Debug, Clone, Serialize)]
pub struct RulebookSummary {
    /// Number of rules.
    pub total_rules: usize,
    /// Number of AUTO_HEAL rules.
    pub auto_heal_rules: usize,
    /// Number of ADMIN_REVIEW rules.
    pub admin_review_rules: usize,
    /// Issue types with a rule.
    pub supported_issue_types: Vec<IssueType>,
    /// Rule description keyed by issue type.
    pub rules_by_type: BTreeMap<IssueType, RuleDescription>,
}

/// Validated, immutable rule registry keyed by issue type.
#[derive(Debug, Clone)]
pub struct Rulebook {
    rules: BTreeMap<IssueType, Rule>,
}

impl Rulebook {
    /// Build the official rulebook and validate it.
    ///
    /// Call once at startup; a failure must abort the process.
    ///
    /// # Errors
    ///
    /// Returns the first [`RulebookError`] found.
    pub fn initialize() -> Result<Self, RulebookError> {
        Self::from_rules(official_rules())
    }

    /// Build a rulebook from an arbitrary rule set and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`RulebookError`] if an issue type has zero or several rules,
    /// a confidence is outside `[0, 1]`, or an AUTO_HEAL rule is not simulated.
    pub fn from_rules(rules: Vec<(IssueType, Rule)>) -> Result<Self, RulebookError> {
        let mut map = BTreeMap::new();
        for (issue_type, rule) in rules {
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(RulebookError::ConfidenceOutOfRange {
                    issue_type,
                    confidence: rule.confidence,
                });
            }
            if rule.decision_type == DecisionType::AutoHeal
                && rule.execution_mode != ExecutionMode::Simulated
            {
                return Err(RulebookError::UnsafeAutoHeal {
                    issue_type,
                    execution_mode: rule.execution_mode,
                });
            }
            if map.insert(issue_type, rule).is_some() {
                return Err(RulebookError::DuplicateRule(issue_type));
            }
        }

        if let Some(missing) = IssueType::ALL.into_iter().find(|t| !map.contains_key(t)) {
            return Err(RulebookError::MissingRule(missing));
        }

        Ok(Self { rules: map })
    }

    /// Match an issue type label and context to a rule.
    ///
    /// Never fails: unknown labels and violated conditions yield a synthetic
    /// ADMIN_REVIEW rule with confidence 1.0.
    pub fn match_issue(&self, issue_type: &str, context: &MatchContext) -> Rule {
        let Some(known) = IssueType::parse(issue_type) else {
            return Rule::admin_review(
                issue_type,
                format!("Unknown issue type '{issue_type}' requires manual analysis"),
            );
        };

        let Some(rule) = self.rules.get(&known) else {
            return Rule::admin_review(
                known.as_str(),
                format!("No rule defined for issue type '{known}'"),
            );
        };

        match rule.conditions {
            Some(conditions) if !conditions.are_met(context) => Rule::admin_review(
                known.as_str(),
                format!("Conditions not met for auto-healing {known}"),
            ),
            _ => rule.clone(),
        }
    }

    /// The unconditional rule registered for an issue type.
    pub fn rule_for(&self, issue_type: IssueType) -> Option<&Rule> {
        self.rules.get(&issue_type)
    }

    /// Maximum retries allowed by the rule for `issue_type`, falling back to
    /// [`MAX_RETRY_COUNT`].
    pub fn max_retries(&self, issue_type: IssueType) -> u32 {
        self.rules
            .get(&issue_type)
            .and_then(|r| r.conditions)
            .and_then(|c| c.max_retries)
            .unwrap_or(MAX_RETRY_COUNT)
    }

    /// Summarize the registry for documentation and audit.
    pub fn summary(&self) -> RulebookSummary {
        let count = |d: DecisionType| self.rules.values().filter(|r| r.decision_type == d).count();
        RulebookSummary {
            total_rules: self.rules.len(),
            auto_heal_rules: count(DecisionType::AutoHeal),
            admin_review_rules: count(DecisionType::AdminReview),
            supported_issue_types: self.rules.keys().copied().collect(),
            rules_by_type: self
                .rules
                .iter()
                .map(|(issue_type, rule)| {
                    (
                        *issue_type,
                        RuleDescription {
                            decision_type: rule.decision_type,
                            action_type: rule.action_type,
                            execution_mode: rule.execution_mode,
                            reason: rule.reason.clone(),
                            confidence: rule.confidence,
                            has_conditions: rule.conditions.is_some(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// The official rule set.
fn official_rules() -> Vec<(IssueType, Rule)> {
    let rule = |issue_type: IssueType,
                decision_type: DecisionType,
                action_type: ActionType,
                execution_mode: ExecutionMode,
                reason: &str,
                confidence: f64,
                conditions: Option<RuleConditions>| {
        (
            issue_type,
            Rule {
                issue_type: issue_type.as_str().to_owned(),
                decision_type,
                action_type,
                execution_mode,
                reason: reason.to_owned(),
                confidence,
                conditions,
            },
        )
    };

    vec![
        rule(
            IssueType::Deadlock,
            DecisionType::AutoHeal,
            ActionType::RollbackTransaction,
            ExecutionMode::Simulated,
            "InnoDB already chooses deadlock victim; rollback is safe and deterministic",
            0.95,
            None,
        ),
        rule(
            IssueType::SlowQuery,
            DecisionType::AdminReview,
            ActionType::None,
            ExecutionMode::Manual,
            "Slow queries require query analysis, index optimization, or schema redesign",
            1.0,
            None,
        ),
        rule(
            IssueType::ConnectionOverload,
            DecisionType::AdminReview,
            ActionType::None,
            ExecutionMode::Manual,
            "Connection limits require capacity planning; killing connections may break applications",
            1.0,
            None,
        ),
        rule(
            IssueType::TransactionFailure,
            DecisionType::AutoHeal,
            ActionType::RetryOperation,
            ExecutionMode::Simulated,
            "Transient transaction failures can be safely retried with exponential backoff",
            0.80,
            Some(RuleConditions {
                max_retries: Some(MAX_RETRY_COUNT),
                timeout_threshold: None,
            }),
        ),
        rule(
            IssueType::LockWait,
            DecisionType::AutoHeal,
            ActionType::RetryOperation,
            ExecutionMode::Simulated,
            "Short lock waits can be retried; long waits indicate design issues",
            0.70,
            Some(RuleConditions {
                max_retries: None,
                timeout_threshold: Some(LOCK_WAIT_TIMEOUT_THRESHOLD),
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn official_rules_cover_every_issue_type_once() {
        let rules = official_rules();
        assert_eq!(rules.len(), IssueType::ALL.len());
        for issue_type in IssueType::ALL {
            assert_eq!(rules.iter().filter(|(t, _)| *t == issue_type).count(), 1);
        }
    }

    #[test]
    fn empty_context_meets_all_conditions() {
        let conditions = RuleConditions {
            max_retries: Some(3),
            timeout_threshold: Some(30.0),
        };
        assert!(conditions.are_met(&MatchContext::default()));
    }
}

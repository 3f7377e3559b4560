//! Tests for rule matching and rulebook validation.

use dbheal::rulebook::{
    ActionType, DecisionType, ExecutionMode, IssueType, MatchContext, Rule, RuleConditions,
    Rulebook, RulebookError, MAX_RETRY_COUNT,
};

fn rulebook() -> Rulebook {
    Rulebook::initialize().expect("official rulebook is valid")
}

fn simple_rule(issue_type: IssueType, decision_type: DecisionType, mode: ExecutionMode) -> Rule {
    Rule {
        issue_type: issue_type.as_str().to_owned(),
        decision_type,
        action_type: ActionType::None,
        execution_mode: mode,
        reason: "test".to_owned(),
        confidence: 1.0,
        conditions: None,
    }
}

fn full_rule_set() -> Vec<(IssueType, Rule)> {
    IssueType::ALL
        .into_iter()
        .map(|t| {
            (
                t,
                simple_rule(t, DecisionType::AdminReview, ExecutionMode::Manual),
            )
        })
        .collect()
}

// ---------- official rules ----------

#[test]
fn every_issue_type_has_a_safe_rule() {
    let rulebook = rulebook();
    for issue_type in IssueType::ALL {
        let rule = rulebook.match_issue(issue_type.as_str(), &MatchContext::default());
        assert_eq!(rule.issue_type, issue_type.as_str());
        assert!((0.0..=1.0).contains(&rule.confidence));
        if rule.decision_type == DecisionType::AutoHeal {
            assert_eq!(rule.execution_mode, ExecutionMode::Simulated);
        }
    }
}

#[test]
fn deadlock_rolls_back() {
    let rule = rulebook().match_issue("DEADLOCK", &MatchContext::default());
    assert_eq!(rule.decision_type, DecisionType::AutoHeal);
    assert_eq!(rule.action_type, ActionType::RollbackTransaction);
    assert_eq!(rule.execution_mode, ExecutionMode::Simulated);
    assert!((rule.confidence - 0.95).abs() < f64::EPSILON);
}

#[test]
fn slow_query_and_overload_go_to_admin() {
    let rulebook = rulebook();
    for label in ["SLOW_QUERY", "CONNECTION_OVERLOAD"] {
        let rule = rulebook.match_issue(label, &MatchContext::default());
        assert_eq!(rule.decision_type, DecisionType::AdminReview);
        assert_eq!(rule.action_type, ActionType::None);
        assert_eq!(rule.execution_mode, ExecutionMode::Manual);
    }
}

#[test]
fn labels_must_match_exactly() {
    for label in ["deadlock", " DEADLOCK", "Deadlock"] {
        let rule = rulebook().match_issue(label, &MatchContext::default());
        assert_eq!(rule.decision_type, DecisionType::AdminReview, "{label:?}");
        assert_eq!(rule.action_type, ActionType::None);
        assert_eq!(rule.issue_type, label);
    }
}

#[test]
fn unknown_issue_type_is_escalated() {
    let rule = rulebook().match_issue("DISK_FULL", &MatchContext::default());
    assert_eq!(rule.decision_type, DecisionType::AdminReview);
    assert!((rule.confidence - 1.0).abs() < f64::EPSILON);
    assert!(rule.reason.to_lowercase().contains("unknown issue type"));
    assert_eq!(rule.issue_type, "DISK_FULL");
}

// ---------- conditional rules ----------

#[test]
fn transaction_failure_retries_until_limit() {
    let rulebook = rulebook();
    let below = MatchContext {
        retry_count: Some(MAX_RETRY_COUNT - 1),
        ..MatchContext::default()
    };
    let at_limit = MatchContext {
        retry_count: Some(MAX_RETRY_COUNT),
        ..MatchContext::default()
    };

    let rule = rulebook.match_issue("TRANSACTION_FAILURE", &below);
    assert_eq!(rule.decision_type, DecisionType::AutoHeal);
    assert_eq!(rule.action_type, ActionType::RetryOperation);

    let rule = rulebook.match_issue("TRANSACTION_FAILURE", &at_limit);
    assert_eq!(rule.decision_type, DecisionType::AdminReview);
    assert!(rule.reason.contains("Conditions not met"));
}

#[test]
fn lock_wait_threshold_is_inclusive() {
    let rulebook = rulebook();
    let at = MatchContext {
        timeout_seconds: Some(30.0),
        ..MatchContext::default()
    };
    let over = MatchContext {
        timeout_seconds: Some(31.0),
        ..MatchContext::default()
    };

    assert_eq!(
        rulebook.match_issue("LOCK_WAIT", &at).decision_type,
        DecisionType::AutoHeal
    );
    assert_eq!(
        rulebook.match_issue("LOCK_WAIT", &over).decision_type,
        DecisionType::AdminReview
    );
}

#[test]
fn conditions_treat_missing_values_as_zero() {
    let conditions = RuleConditions {
        max_retries: Some(1),
        timeout_threshold: Some(0.0),
    };
    assert!(conditions.are_met(&MatchContext::default()));
}

#[test]
fn max_retries_comes_from_the_rule() {
    let rulebook = rulebook();
    assert_eq!(
        rulebook.max_retries(IssueType::TransactionFailure),
        MAX_RETRY_COUNT
    );
    assert_eq!(rulebook.max_retries(IssueType::Deadlock), MAX_RETRY_COUNT);
}

// ---------- validation ----------

#[test]
fn non_simulated_auto_heal_is_rejected() {
    let mut rules = full_rule_set();
    rules[0].1 = simple_rule(
        IssueType::Deadlock,
        DecisionType::AutoHeal,
        ExecutionMode::Automatic,
    );
    let err = Rulebook::from_rules(rules).expect_err("must reject");
    assert_eq!(
        err,
        RulebookError::UnsafeAutoHeal {
            issue_type: IssueType::Deadlock,
            execution_mode: ExecutionMode::Automatic,
        }
    );
}

#[test]
fn missing_rule_is_rejected() {
    let mut rules = full_rule_set();
    rules.retain(|(t, _)| *t != IssueType::LockWait);
    let err = Rulebook::from_rules(rules).expect_err("must reject");
    assert_eq!(err, RulebookError::MissingRule(IssueType::LockWait));
}

#[test]
fn duplicate_rule_is_rejected() {
    let mut rules = full_rule_set();
    rules.push((
        IssueType::SlowQuery,
        simple_rule(
            IssueType::SlowQuery,
            DecisionType::AdminReview,
            ExecutionMode::Manual,
        ),
    ));
    let err = Rulebook::from_rules(rules).expect_err("must reject");
    assert_eq!(err, RulebookError::DuplicateRule(IssueType::SlowQuery));
}

#[test]
fn confidence_out_of_range_is_rejected() {
    let mut rules = full_rule_set();
    rules[1].1.confidence = 1.5;
    let err = Rulebook::from_rules(rules).expect_err("must reject");
    assert!(matches!(err, RulebookError::ConfidenceOutOfRange { .. }));
}

#[test]
fn summary_counts_rules() {
    let summary = rulebook().summary();
    assert_eq!(summary.total_rules, 5);
    assert_eq!(summary.auto_heal_rules, 3);
    assert_eq!(summary.admin_review_rules, 2);
    assert_eq!(summary.supported_issue_types.len(), 5);
    assert!(
        summary.rules_by_type[&IssueType::TransactionFailure].has_conditions,
        "retry rule is conditional"
    );
}

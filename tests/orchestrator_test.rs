//! Tests for cycle orchestration, integrity scoring, and the audit report.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dbheal::config::AuditConfig;
use dbheal::engine::healing::{ActionViolation, HealingSafetyReport};
use dbheal::orchestrator::{
    audit_recommendations, integrity_score, Orchestrator, RecommendationCategory,
    WorkflowIntegrity,
};
use dbheal::safety::validate_write;
use dbheal::store::{
    table, AdminDisposition, AdminReview, Decision, DecisionTypeRow, HealingAction,
    HealingStatRow, InsertOutcome, IntegrityCounts, Issue, LearningStatRow, PendingDecision,
    PendingReview, ReadStore, RecordedAction, ReviewActionRow, StoreError, WriteStore,
};

use common::{open_test_db, rulebook, seed_issue, seed_learning, TestDb};

fn orchestrator(db: &TestDb) -> Orchestrator {
    Orchestrator::new(rulebook(), db.reader(), db.writer(), &db.config())
}

async fn seed_mixed(db: &TestDb) {
    seed_issue(&db.path, "deadlock", "DEADLOCK", None, "2024-01-01T00:00:00Z").await;
    seed_issue(&db.path, "slow", "SLOW_QUERY", Some(75.0), "2024-01-01T00:00:01Z").await;
    seed_issue(&db.path, "conn", "CONNECTION_OVERLOAD", Some(150.0), "2024-01-01T00:00:02Z").await;
    seed_issue(&db.path, "txn", "TRANSACTION_FAILURE", None, "2024-01-01T00:00:03Z").await;
    seed_issue(&db.path, "lock", "LOCK_WAIT", Some(45.0), "2024-01-01T00:00:04Z").await;
}

fn integrity(score: f64) -> WorkflowIntegrity {
    WorkflowIntegrity {
        issues_without_decisions: 0,
        decisions_without_issues: 0,
        integrity_score: score,
        workflow_complete: score > 90.0,
        error: None,
    }
}

/// Delegates to a real reader but fails the issue backlog query.
struct FailingBacklog {
    inner: Arc<dyn ReadStore>,
}

#[async_trait]
impl ReadStore for FailingBacklog {
    async fn unprocessed_issues(&self) -> Result<Vec<Issue>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }
    async fn retry_count_for_issue(&self, issue_id: &str) -> Result<u32, StoreError> {
        self.inner.retry_count_for_issue(issue_id).await
    }
    async fn unhealed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        self.inner.unhealed_decisions().await
    }
    async fn unreviewed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        self.inner.unreviewed_decisions().await
    }
    async fn decision_for_issue(&self, issue_id: &str) -> Result<Option<Decision>, StoreError> {
        self.inner.decision_for_issue(issue_id).await
    }
    async fn admin_review(&self, review_id: &str) -> Result<Option<AdminReview>, StoreError> {
        self.inner.admin_review(review_id).await
    }
    async fn pending_reviews(&self) -> Result<Vec<PendingReview>, StoreError> {
        self.inner.pending_reviews().await
    }
    async fn recorded_actions(&self) -> Result<Vec<RecordedAction>, StoreError> {
        self.inner.recorded_actions().await
    }
    async fn integrity_counts(&self) -> Result<IntegrityCounts, StoreError> {
        self.inner.integrity_counts().await
    }
    async fn decision_type_stats(&self) -> Result<Vec<DecisionTypeRow>, StoreError> {
        self.inner.decision_type_stats().await
    }
    async fn healing_stats(&self, executed_by: &str) -> Result<Vec<HealingStatRow>, StoreError> {
        self.inner.healing_stats(executed_by).await
    }
    async fn review_action_stats(&self) -> Result<Vec<ReviewActionRow>, StoreError> {
        self.inner.review_action_stats().await
    }
    async fn learning_stats(&self) -> Result<Vec<LearningStatRow>, StoreError> {
        self.inner.learning_stats().await
    }
}

/// A writer with no guards of its own that logs every write it forwards.
struct RecordingWriter {
    inner: Arc<dyn WriteStore>,
    writes: Mutex<Vec<(&'static str, &'static str)>>,
}

impl RecordingWriter {
    fn record(&self, operation: &'static str, target: &'static str) {
        self.writes
            .lock()
            .expect("writes lock")
            .push((operation, target));
    }

    fn writes(&self) -> Vec<(&'static str, &'static str)> {
        self.writes.lock().expect("writes lock").clone()
    }
}

#[async_trait]
impl WriteStore for RecordingWriter {
    async fn insert_decision(&self, decision: &Decision) -> Result<InsertOutcome, StoreError> {
        self.record("INSERT", table::DECISION_LOG);
        self.inner.insert_decision(decision).await
    }
    async fn insert_healing_action(
        &self,
        action: &HealingAction,
    ) -> Result<InsertOutcome, StoreError> {
        self.record("INSERT", table::HEALING_ACTIONS);
        self.inner.insert_healing_action(action).await
    }
    async fn insert_admin_review(
        &self,
        review: &AdminReview,
    ) -> Result<InsertOutcome, StoreError> {
        self.record("INSERT", table::ADMIN_REVIEWS);
        self.inner.insert_admin_review(review).await
    }
    async fn update_admin_review(
        &self,
        review_id: &str,
        disposition: &AdminDisposition,
    ) -> Result<bool, StoreError> {
        self.record("UPDATE", table::ADMIN_REVIEWS);
        self.inner.update_admin_review(review_id, disposition).await
    }
}

// ---------- cycles ----------

#[tokio::test]
async fn mixed_cycle_routes_every_issue() {
    let db = open_test_db().await;
    seed_mixed(&db).await;

    let report = orchestrator(&db).run_cycle().await;
    assert!(report.cycle_id.starts_with("cycle_"));
    assert!(report.overall_success, "{report:?}");

    let summary = &report.summary;
    assert_eq!(summary.total_issues_processed, 5);
    assert_eq!(summary.total_decisions_made, 5);
    // DEADLOCK and a fresh TRANSACTION_FAILURE heal; the 45s LOCK_WAIT escalates.
    assert_eq!(summary.auto_heal_count, 2);
    assert_eq!(summary.admin_review_count, 3);
    assert_eq!(summary.total_actions_executed, 2);
    assert_eq!(summary.total_reviews_created, 3);
    assert_eq!(
        summary.successful_actions.saturating_add(summary.failed_actions),
        2
    );
    assert_eq!(summary.item_errors, 0);
    assert_eq!(summary.stages_completed, 4);
    assert_eq!(summary.stages_failed, 0);
    assert!(summary.safety_compliant);

    assert!((report.integrity.integrity_score - 100.0).abs() < f64::EPSILON);
    assert!(report.integrity.workflow_complete);
}

#[tokio::test]
async fn second_cycle_creates_nothing_new() {
    let db = open_test_db().await;
    seed_mixed(&db).await;
    let orchestrator = orchestrator(&db);

    orchestrator.run_cycle().await;
    let second = orchestrator.run_cycle().await;
    assert_eq!(second.summary.total_issues_processed, 0);
    assert_eq!(second.summary.total_decisions_made, 0);
    assert_eq!(second.summary.total_actions_executed, 0);
    assert_eq!(second.summary.total_reviews_created, 0);
    assert!(second.overall_success);
}

#[tokio::test]
async fn parallel_dispatch_produces_the_same_records() {
    let db = open_test_db().await;
    seed_mixed(&db).await;
    let mut config = db.config();
    config.pipeline.parallel_dispatch = true;

    let report = Orchestrator::new(rulebook(), db.reader(), db.writer(), &config)
        .run_cycle()
        .await;
    assert!(report.overall_success);
    assert_eq!(report.summary.total_actions_executed, 2);
    assert_eq!(report.summary.total_reviews_created, 3);
}

#[tokio::test]
async fn failed_stage_does_not_stop_the_cycle() {
    let db = open_test_db().await;
    seed_mixed(&db).await;
    let reader: Arc<dyn ReadStore> = Arc::new(FailingBacklog { inner: db.reader() });

    let report = Orchestrator::new(rulebook(), reader, db.writer(), &db.config())
        .run_cycle()
        .await;
    assert!(!report.stages.decisions.success);
    assert!(report.stages.decisions.error.is_some());
    assert!(report.stages.healing.success);
    assert!(report.stages.admin_reviews.success);
    assert!(report.stages.safety_validation.success);
    assert_eq!(report.summary.stages_failed, 1);
    assert_eq!(report.summary.stages_completed, 3);
    assert!(!report.overall_success);

    // Nothing was decided, so five issues lack decisions.
    assert_eq!(report.integrity.issues_without_decisions, 5);
    assert!((report.integrity.integrity_score - 50.0).abs() < f64::EPSILON);
    assert!(!report.integrity.workflow_complete);
}

#[tokio::test]
async fn engines_only_issue_allow_listed_writes() {
    let db = open_test_db().await;
    seed_mixed(&db).await;
    let writer = Arc::new(RecordingWriter {
        inner: db.writer(),
        writes: Mutex::new(Vec::new()),
    });

    let orchestrator = Orchestrator::new(rulebook(), db.reader(), writer.clone(), &db.config());
    let report = orchestrator.run_cycle().await;
    assert!(report.overall_success, "{report:?}");
    let review_id = orchestrator
        .review_engine()
        .pending_reviews()
        .await
        .expect("pending")[0]
        .review_id
        .clone();
    assert!(orchestrator
        .review_engine()
        .simulate_admin_action(&review_id, "APPROVED", None, false)
        .await
        .expect("update"));

    let writes = writer.writes();
    // Five decisions, two actions, three reviews, one disposition.
    assert_eq!(writes.len(), 11);
    for (operation, target) in &writes {
        assert!(validate_write(operation, target).is_ok(), "{operation} {target}");
        assert_ne!(*target, table::DETECTED_ISSUES);
    }
}

// ---------- integrity ----------

#[test]
fn integrity_score_loses_ten_points_per_problem() {
    assert!((integrity_score(0, 0) - 100.0).abs() < f64::EPSILON);
    assert!((integrity_score(1, 0) - 90.0).abs() < f64::EPSILON);
    assert!((integrity_score(2, 3) - 50.0).abs() < f64::EPSILON);
    assert!((integrity_score(11, 0) - 0.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn one_undecided_issue_is_not_complete() {
    let db = open_test_db().await;
    seed_issue(&db.path, "i1", "DEADLOCK", None, "2024-01-01T00:00:00Z").await;

    let integrity = orchestrator(&db).workflow_integrity().await;
    assert_eq!(integrity.issues_without_decisions, 1);
    assert!((integrity.integrity_score - 90.0).abs() < f64::EPSILON);
    assert!(!integrity.workflow_complete);
    assert!(integrity.error.is_none());
}

// ---------- status and audit ----------

#[tokio::test]
async fn system_status_reports_every_engine() {
    let db = open_test_db().await;
    seed_mixed(&db).await;
    seed_learning(
        &db.path,
        "l1",
        "DEADLOCK",
        "ROLLBACK_TRANSACTION",
        "RESOLVED",
        0.95,
        0.955,
    )
    .await;
    let orchestrator = orchestrator(&db);
    orchestrator.run_cycle().await;

    let status = orchestrator.system_status().await.expect("status");
    assert_eq!(status.engines.decisions.total_decisions, 5);
    assert_eq!(status.engines.healing.total_actions, 2);
    assert_eq!(status.engines.admin_reviews.pending_reviews, 3);
    assert_eq!(status.engines.learning.total_records, 1);
    assert_eq!(status.rulebook.total_rules, 5);
    assert!(status.safety.safety_guards_active);
}

#[tokio::test]
async fn audit_flags_a_review_backlog() {
    let db = open_test_db().await;
    for i in 0..6 {
        seed_issue(
            &db.path,
            &format!("slow-{i}"),
            "SLOW_QUERY",
            Some(20.0),
            &format!("2024-01-01T00:00:0{i}Z"),
        )
        .await;
    }
    let orchestrator = orchestrator(&db);
    orchestrator.run_cycle().await;

    let audit = orchestrator.generate_audit_report().await;
    assert!(audit.report_id.starts_with("audit_"));
    assert!(audit.errors.is_empty());
    assert!(audit.system_status.is_some());
    assert!(audit
        .recommendations
        .iter()
        .any(|r| r.category == RecommendationCategory::AdminWorkload));
    assert!(audit
        .recommendations
        .iter()
        .any(|r| r.category == RecommendationCategory::Maintenance));
    assert!(!audit
        .recommendations
        .iter()
        .any(|r| r.category == RecommendationCategory::DataIntegrity));
}

#[test]
fn recommendations_follow_thresholds() {
    let config = AuditConfig::default();

    let quiet = audit_recommendations(&config, Some(5), &integrity(100.0), None, &[]);
    assert_eq!(quiet.len(), 1);
    assert_eq!(quiet[0].category, RecommendationCategory::Maintenance);

    let busy = audit_recommendations(&config, Some(6), &integrity(90.0), None, &[]);
    let categories: Vec<_> = busy.iter().map(|r| r.category).collect();
    assert!(categories.contains(&RecommendationCategory::AdminWorkload));
    assert!(categories.contains(&RecommendationCategory::DataIntegrity));

    let errors = vec!["system status: boom".to_owned()];
    let failed = audit_recommendations(&config, None, &integrity(100.0), None, &errors);
    assert!(failed
        .iter()
        .any(|r| r.category == RecommendationCategory::SystemError
            && r.description == "system status: boom"));
}

#[test]
fn unsafe_actions_raise_a_compliance_recommendation() {
    let report = HealingSafetyReport {
        checked_at: "2024-01-01T00:00:00Z".to_owned(),
        total_actions: 1,
        simulated_actions: 0,
        unsafe_actions: 1,
        violations: vec![ActionViolation {
            action_id: "a1".to_owned(),
            action_type: "KILL_CONNECTION".to_owned(),
            execution_mode: "AUTOMATIC".to_owned(),
            violation: "Non-simulated execution mode: AUTOMATIC".to_owned(),
        }],
        is_safe: false,
    };

    let recs = audit_recommendations(
        &AuditConfig::default(),
        Some(0),
        &integrity(100.0),
        Some(&report),
        &[],
    );
    assert!(recs
        .iter()
        .any(|r| r.category == RecommendationCategory::SafetyCompliance));
}

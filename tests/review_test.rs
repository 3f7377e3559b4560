//! Tests for the admin review engine: priority, playbooks, and dispositions.

mod common;

use dbheal::engine::decision::DecisionEngine;
use dbheal::engine::review::{determine_priority, generate_recommendations, Priority, ReviewEngine};
use dbheal::engine::EngineError;

use common::{open_test_db, rulebook, seed_issue, StaleBacklog, TestDb};

fn reviews(db: &TestDb) -> ReviewEngine {
    ReviewEngine::new(db.reader(), db.writer())
}

async fn decide(db: &TestDb) {
    DecisionEngine::new(rulebook(), db.reader(), db.writer())
        .process_new_issues()
        .await
        .expect("decision pass");
}

// ---------- priority ----------

#[test]
fn slow_query_priority_boundaries() {
    assert_eq!(determine_priority("SLOW_QUERY", Some(61.0)), Priority::High);
    assert_eq!(determine_priority("SLOW_QUERY", Some(60.0)), Priority::Medium);
    assert_eq!(determine_priority("SLOW_QUERY", Some(11.0)), Priority::Medium);
    assert_eq!(determine_priority("SLOW_QUERY", Some(10.0)), Priority::Low);
    assert_eq!(determine_priority("SLOW_QUERY", None), Priority::Low);
}

#[test]
fn lock_wait_priority_boundaries() {
    assert_eq!(determine_priority("LOCK_WAIT", Some(31.0)), Priority::High);
    assert_eq!(determine_priority("LOCK_WAIT", Some(30.0)), Priority::Medium);
    assert_eq!(determine_priority("LOCK_WAIT", Some(6.0)), Priority::Medium);
    assert_eq!(determine_priority("LOCK_WAIT", Some(5.0)), Priority::Low);
}

#[test]
fn failures_and_overload_are_always_high() {
    assert_eq!(determine_priority("TRANSACTION_FAILURE", None), Priority::High);
    assert_eq!(determine_priority("CONNECTION_OVERLOAD", Some(1.0)), Priority::High);
}

#[test]
fn unknown_types_are_low_priority() {
    assert_eq!(determine_priority("DISK_FULL", Some(1000.0)), Priority::Low);
    assert_eq!(determine_priority("DEADLOCK", Some(1000.0)), Priority::Low);
}

// ---------- playbooks ----------

#[test]
fn slow_query_playbook_scales_with_metric() {
    let heavy = generate_recommendations("SLOW_QUERY", Some(75.0));
    assert_eq!(
        heavy.primary_action,
        "Analyze query execution plan and optimize"
    );
    assert_eq!(heavy.estimated_effort, Priority::High);
    assert_eq!(heavy.urgency, Priority::High);

    let light = generate_recommendations("SLOW_QUERY", Some(12.0));
    assert_eq!(light.estimated_effort, Priority::Medium);
    assert_eq!(light.urgency, Priority::Medium);
}

#[test]
fn connection_overload_urgency_follows_metric() {
    assert_eq!(
        generate_recommendations("CONNECTION_OVERLOAD", Some(95.0)).urgency,
        Priority::High
    );
    assert_eq!(
        generate_recommendations("CONNECTION_OVERLOAD", Some(50.0)).urgency,
        Priority::Medium
    );
}

#[test]
fn every_playbook_is_populated() {
    for issue_type in [
        "SLOW_QUERY",
        "CONNECTION_OVERLOAD",
        "TRANSACTION_FAILURE",
        "LOCK_WAIT",
        "DEADLOCK",
        "DISK_FULL",
    ] {
        let recs = generate_recommendations(issue_type, Some(1.0));
        assert!(!recs.primary_action.is_empty(), "{issue_type}");
        assert!(!recs.secondary_actions.is_empty(), "{issue_type}");
        assert!(!recs.investigation_steps.is_empty(), "{issue_type}");
        assert!(!recs.prevention_measures.is_empty(), "{issue_type}");
    }
}

#[test]
fn unknown_type_playbook_names_the_type() {
    let recs = generate_recommendations("DISK_FULL", None);
    assert_eq!(recs.primary_action, "Investigate unknown issue type: DISK_FULL");
    assert_eq!(recs.urgency, Priority::High);
}

// ---------- processing ----------

#[tokio::test]
async fn slow_query_review_is_created_pending() {
    let db = open_test_db().await;
    seed_issue(&db.path, "i1", "SLOW_QUERY", Some(75.0), "2024-01-01T00:00:00Z").await;
    decide(&db).await;

    let result = reviews(&db)
        .process_admin_review_decisions()
        .await
        .expect("review pass");
    assert_eq!(result.processed, 1);
    assert_eq!(result.created, 1);
    assert_eq!(result.high_priority_count, 1);
    assert!(result.errors.is_empty());

    let review = &result.reviews[0];
    assert_eq!(review.admin_action, "PENDING");
    assert!(!review.override_flag);
    assert_eq!(review.priority, Priority::High);
    assert_eq!(review.recommendations.urgency, Priority::High);
    assert_eq!(review.issue_context["issue_id"], "i1");
    assert_eq!(review.issue_context["issue_type"], "SLOW_QUERY");
    assert_eq!(review.issue_context["metric_value"], 75.0);
    assert!(review
        .escalation_reason
        .starts_with("Slow queries require query analysis"));

    let pending = reviews(&db).pending_reviews().await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].review_id, review.id);
    assert_eq!(pending[0].priority, "HIGH");
}

#[tokio::test]
async fn each_decision_is_reviewed_once() {
    let db = open_test_db().await;
    seed_issue(&db.path, "i1", "CONNECTION_OVERLOAD", Some(500.0), "2024-01-01T00:00:00Z").await;
    seed_issue(&db.path, "i2", "DEADLOCK", None, "2024-01-01T00:00:01Z").await;
    decide(&db).await;
    let engine = reviews(&db);

    let first = engine.process_admin_review_decisions().await.expect("first pass");
    assert_eq!(first.created, 1, "DEADLOCK is healed, not reviewed");

    let second = engine
        .process_admin_review_decisions()
        .await
        .expect("second pass");
    assert_eq!(second.processed, 0);
    assert_eq!(second.created, 0);
}

#[tokio::test]
async fn losing_a_review_race_is_a_skip() {
    let db = open_test_db().await;
    seed_issue(&db.path, "i1", "SLOW_QUERY", Some(40.0), "2024-01-01T00:00:00Z").await;
    decide(&db).await;
    let stale = StaleBacklog::capture(db.reader()).await;

    let first = reviews(&db)
        .process_admin_review_decisions()
        .await
        .expect("first pipeline");
    assert_eq!(first.created, 1);
    assert_eq!(first.skipped, 0);

    let second = ReviewEngine::new(stale, db.writer())
        .process_admin_review_decisions()
        .await
        .expect("second pipeline");
    assert_eq!(second.processed, 1);
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 1);
    assert!(second.errors.is_empty(), "{:?}", second.errors);
    assert!(second.reviews.is_empty());
    assert_eq!(db.reader().pending_reviews().await.expect("pending").len(), 1);
}

// ---------- dispositions ----------

#[tokio::test]
async fn admin_action_is_recorded() {
    let db = open_test_db().await;
    seed_issue(&db.path, "i1", "SLOW_QUERY", Some(20.0), "2024-01-01T00:00:00Z").await;
    decide(&db).await;
    let engine = reviews(&db);
    let created = engine
        .process_admin_review_decisions()
        .await
        .expect("review pass");
    let review_id = created.reviews[0].id.clone();

    let matched = engine
        .simulate_admin_action(&review_id, " approved ", Some("index added"), true)
        .await
        .expect("update");
    assert!(matched);

    let stored = db
        .reader()
        .admin_review(&review_id)
        .await
        .expect("query")
        .expect("review present");
    assert_eq!(stored.admin_action, "APPROVED");
    assert_eq!(stored.admin_comment.as_deref(), Some("index added"));
    assert!(stored.override_flag);
    assert!(engine.pending_reviews().await.expect("pending").is_empty());

    let stats = engine.statistics().await.expect("stats");
    assert_eq!(stats.total_reviews, 1);
    assert_eq!(stats.pending_reviews, 0);
    assert_eq!(stats.completed_reviews, 1);
}

#[tokio::test]
async fn unknown_review_id_matches_nothing() {
    let db = open_test_db().await;
    let matched = reviews(&db)
        .simulate_admin_action("no-such-review", "REJECTED", None, false)
        .await
        .expect("update");
    assert!(!matched);
}

#[tokio::test]
async fn empty_admin_action_is_rejected() {
    let db = open_test_db().await;
    let err = reviews(&db)
        .simulate_admin_action("any", "   ", None, false)
        .await
        .expect_err("must reject");
    assert!(matches!(err, EngineError::EmptyAdminAction));
}

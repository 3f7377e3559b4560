//! Shared fixtures: a temporary pipeline database plus a raw connection
//! standing in for the external detector.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use dbheal::config::{DatabaseConfig, DbhealConfig};
use dbheal::rulebook::Rulebook;
use dbheal::store::sqlite::SqliteStore;
use dbheal::store::{
    AdminReview, Decision, DecisionTypeRow, HealingStatRow, IntegrityCounts, Issue,
    LearningStatRow, PendingDecision, PendingReview, ReadStore, RecordedAction, ReviewActionRow,
    StoreError, WriteStore,
};

/// A store opened on a file inside a temporary directory.
pub struct TestDb {
    pub store: SqliteStore,
    pub path: PathBuf,
    pub dir: tempfile::TempDir,
}

impl TestDb {
    pub fn reader(&self) -> Arc<dyn ReadStore> {
        self.store.reader()
    }

    pub fn writer(&self) -> Arc<dyn WriteStore> {
        self.store.writer()
    }

    pub fn config(&self) -> DbhealConfig {
        config_for(&self.path)
    }
}

pub fn config_for(path: &Path) -> DbhealConfig {
    let mut config = DbhealConfig::default();
    config.database = DatabaseConfig {
        path: path.to_path_buf(),
        ..DatabaseConfig::default()
    };
    config
}

pub async fn open_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dbheal_test.db");
    let store = SqliteStore::open(&config_for(&path).database)
        .await
        .expect("open store");
    TestDb { store, path, dir }
}

pub fn rulebook() -> Arc<Rulebook> {
    Arc::new(Rulebook::initialize().expect("official rulebook is valid"))
}

/// Read-write connection that bypasses the guards, as the detector would.
pub async fn raw_pool(path: &Path) -> SqlitePool {
    SqlitePool::connect_with(SqliteConnectOptions::new().filename(path))
        .await
        .expect("raw pool")
}

pub async fn seed_issue(
    path: &Path,
    id: &str,
    issue_type: &str,
    metric: Option<f64>,
    detected_at: &str,
) {
    let pool = raw_pool(path).await;
    sqlx::query(
        "INSERT INTO detected_issues
            (id, issue_type, detection_source, raw_metric_value, raw_metric_unit, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(id)
    .bind(issue_type)
    .bind("performance_schema")
    .bind(metric)
    .bind(metric.map(|_| "seconds"))
    .bind(detected_at)
    .execute(&pool)
    .await
    .expect("seed issue");
    pool.close().await;
}

/// Learning outcomes arrive from outside the pipeline, like issues.
pub async fn seed_learning(
    path: &Path,
    id: &str,
    issue_type: &str,
    action_type: &str,
    outcome: &str,
    confidence_before: f64,
    confidence_after: f64,
) {
    let pool = raw_pool(path).await;
    sqlx::query(
        "INSERT INTO learning_history
            (id, issue_type, action_type, outcome, confidence_before, confidence_after,
             recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, '2024-01-01T00:00:00Z')",
    )
    .bind(id)
    .bind(issue_type)
    .bind(action_type)
    .bind(outcome)
    .bind(confidence_before)
    .bind(confidence_after)
    .execute(&pool)
    .await
    .expect("seed learning record");
    pool.close().await;
}

/// A reader whose backlogs were captured earlier, as seen by a second
/// pipeline that read before the first one wrote.
pub struct StaleBacklog {
    inner: Arc<dyn ReadStore>,
    issues: Vec<Issue>,
    unhealed: Vec<PendingDecision>,
    unreviewed: Vec<PendingDecision>,
}

impl StaleBacklog {
    pub async fn capture(inner: Arc<dyn ReadStore>) -> Arc<dyn ReadStore> {
        let issues = inner.unprocessed_issues().await.expect("issues");
        let unhealed = inner.unhealed_decisions().await.expect("unhealed");
        let unreviewed = inner.unreviewed_decisions().await.expect("unreviewed");
        Arc::new(Self {
            inner,
            issues,
            unhealed,
            unreviewed,
        })
    }
}

#[async_trait]
impl ReadStore for StaleBacklog {
    async fn unprocessed_issues(&self) -> Result<Vec<Issue>, StoreError> {
        Ok(self.issues.clone())
    }
    async fn retry_count_for_issue(&self, issue_id: &str) -> Result<u32, StoreError> {
        self.inner.retry_count_for_issue(issue_id).await
    }
    async fn unhealed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        Ok(self.unhealed.clone())
    }
    async fn unreviewed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        Ok(self.unreviewed.clone())
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

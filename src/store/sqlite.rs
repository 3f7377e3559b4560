//! SQLite implementation of [`ReadStore`] and [`WriteStore`].
//!
//! Two pools share one database file. The writer pool creates the file,
//! applies the schema, and holds a single connection so inserts are
//! serialized. The reader pool is opened `read_only`, so even a query
//! that slipped past the guards could not mutate anything.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::{
    table, AdminDisposition, AdminReview, Decision, DecisionTypeRow, HealingAction,
    HealingStatRow, InsertOutcome, IntegrityCounts, Issue, LearningStatRow,
    PendingDecision, PendingReview, ReadStore, RecordedAction, ReviewActionRow, StoreError,
    WriteStore, ADMIN_ACTION_PENDING,
};
use crate::config::DatabaseConfig;
use crate::engine::review::{Priority, Recommendations};
use crate::rulebook::{ActionType, DecisionType};
use crate::safety;

/// Owner of both pools.
pub struct SqliteStore {
    reader: Arc<SqliteReader>,
    writer: Arc<SqliteWriter>,
}

impl SqliteStore {
    /// Open (or create) the pipeline database and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the migration fails.
    pub async fn open(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let path = config.path.as_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let busy_timeout = Duration::from_secs(config.busy_timeout_secs);

        let write_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .pragma("trusted_schema", "OFF");

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_options)
            .await
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        let migration_sql = include_str!("../../migrations/001_dbheal_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&write_pool)
            .await
            .context("failed to apply dbheal schema migration")?;

        let read_options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(busy_timeout)
            .pragma("trusted_schema", "OFF");

        let read_pool = SqlitePoolOptions::new()
            .max_connections(config.read_pool_size)
            .connect_with(read_options)
            .await
            .with_context(|| {
                format!("failed to open read-only connection to {}", path.display())
            })?;

        Ok(Self {
            reader: Arc::new(SqliteReader { pool: read_pool }),
            writer: Arc::new(SqliteWriter { pool: write_pool }),
        })
    }

    /// Read-only capability.
    pub fn reader(&self) -> Arc<dyn ReadStore> {
        self.reader.clone()
    }

    /// Write capability.
    pub fn writer(&self) -> Arc<dyn WriteStore> {
        self.writer.clone()
    }

    /// Close both pools, flushing the WAL.
    pub async fn close(&self) {
        self.reader.pool.close().await;
        self.writer.pool.close().await;
    }
}

/// Validate a read statement before it is handed to sqlx.
fn checked(sql: &'static str) -> Result<&'static str, StoreError> {
    safety::validate_read_query(sql)?;
    Ok(sql)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Read-only connection pool.
pub struct SqliteReader {
    pool: SqlitePool,
}

const PENDING_DECISIONS_SQL: &str =
    "SELECT d.id, d.issue_id, d.reason, d.confidence, d.decided_at,
            i.issue_type, i.detection_source, i.raw_metric_value, i.raw_metric_unit, i.detected_at
     FROM decision_log d
     JOIN detected_issues i ON i.id = d.issue_id
     LEFT JOIN healing_actions h ON h.decision_id = d.id
     WHERE d.decision_type = ?1 AND h.id IS NULL
     ORDER BY d.decided_at ASC, d.id ASC";

const UNREVIEWED_DECISIONS_SQL: &str =
    "SELECT d.id, d.issue_id, d.reason, d.confidence, d.decided_at,
            i.issue_type, i.detection_source, i.raw_metric_value, i.raw_metric_unit, i.detected_at
     FROM decision_log d
     JOIN detected_issues i ON i.id = d.issue_id
     LEFT JOIN admin_reviews r ON r.decision_id = d.id
     WHERE d.decision_type = ?1 AND r.id IS NULL
     ORDER BY d.decided_at ASC, d.id ASC";

impl SqliteReader {
    async fn pending_decisions(
        &self,
        sql: &'static str,
        decision_type: DecisionType,
    ) -> Result<Vec<PendingDecision>, StoreError> {
        let rows = sqlx::query_as::<_, PendingDecisionRow>(checked(sql)?)
            .bind(decision_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(pending_decision_from_row).collect())
    }

    async fn count(&self, sql: &'static str) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(checked(sql)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl ReadStore for SqliteReader {
    async fn unprocessed_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let rows = sqlx::query_as::<_, IssueRow>(checked(
            "SELECT i.id, i.issue_type, i.detection_source, i.raw_metric_value,
                    i.raw_metric_unit, i.detected_at
             FROM detected_issues i
             LEFT JOIN decision_log d ON d.issue_id = i.id
             WHERE d.id IS NULL
             ORDER BY i.detected_at ASC, i.id ASC",
        )?)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(issue_from_row).collect())
    }

    async fn retry_count_for_issue(&self, issue_id: &str) -> Result<u32, StoreError> {
        let (count,): (i64,) = sqlx::query_as(checked(
            "SELECT COUNT(*)
             FROM healing_actions h
             JOIN decision_log d ON d.id = h.decision_id
             WHERE d.issue_id = ?1 AND h.action_type = ?2",
        )?)
        .bind(issue_id)
        .bind(ActionType::RetryOperation.as_str())
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(count).map_err(|e| StoreError::Decode {
            column: "retry_count",
            detail: e.to_string(),
        })
    }

    async fn unhealed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        self.pending_decisions(PENDING_DECISIONS_SQL, DecisionType::AutoHeal)
            .await
    }

    async fn unreviewed_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        self.pending_decisions(UNREVIEWED_DECISIONS_SQL, DecisionType::AdminReview)
            .await
    }

    async fn decision_for_issue(&self, issue_id: &str) -> Result<Option<Decision>, StoreError> {
        let row: Option<DecisionRow> = sqlx::query_as(checked(
            "SELECT id, issue_id, decision_type, reason, confidence, decided_at
             FROM decision_log
             WHERE issue_id = ?1",
        )?)
        .bind(issue_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decision_from_row).transpose()
    }

    async fn admin_review(&self, review_id: &str) -> Result<Option<AdminReview>, StoreError> {
        let row: Option<ReviewRow> = sqlx::query_as(checked(
            "SELECT id, decision_id, admin_action, admin_comment, override_flag, priority,
                    recommendations, escalation_reason, issue_context, reviewed_at
             FROM admin_reviews
             WHERE id = ?1",
        )?)
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(review_from_row).transpose()
    }

    async fn pending_reviews(&self) -> Result<Vec<PendingReview>, StoreError> {
        let rows = sqlx::query_as::<_, PendingReviewRow>(checked(
            "SELECT r.id, r.decision_id, r.admin_action, r.priority, r.reviewed_at,
                    d.issue_id, d.reason,
                    i.issue_type, i.detection_source, i.raw_metric_value, i.raw_metric_unit,
                    i.detected_at
             FROM admin_reviews r
             JOIN decision_log d ON d.id = r.decision_id
             JOIN detected_issues i ON i.id = d.issue_id
             WHERE r.admin_action = ?1
             ORDER BY r.reviewed_at ASC, r.id ASC",
        )?)
        .bind(ADMIN_ACTION_PENDING)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(pending_review_from_row).collect())
    }

    async fn recorded_actions(&self) -> Result<Vec<RecordedAction>, StoreError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(checked(
            "SELECT id, action_type, execution_mode, executed_by
             FROM healing_actions
             ORDER BY executed_at ASC, id ASC",
        )?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, action_type, execution_mode, executed_by)| RecordedAction {
                    id,
                    action_type,
                    execution_mode,
                    executed_by,
                },
            )
            .collect())
    }

    async fn integrity_counts(&self) -> Result<IntegrityCounts, StoreError> {
        let issues_without_decisions = self
            .count(
                "SELECT COUNT(*)
                 FROM detected_issues i
                 LEFT JOIN decision_log d ON d.issue_id = i.id
                 WHERE d.id IS NULL",
            )
            .await?;

        let decisions_without_issues = self
            .count(
                "SELECT COUNT(*)
                 FROM decision_log d
                 LEFT JOIN detected_issues i ON i.id = d.issue_id
                 WHERE i.id IS NULL",
            )
            .await?;

        let [auto_heal, admin_review, escalated] = DecisionType::ALL;
        let (invalid_decision_types,): (i64,) = sqlx::query_as(checked(
            "SELECT COUNT(*) FROM decision_log WHERE decision_type NOT IN (?1, ?2, ?3)",
        )?)
        .bind(auto_heal.as_str())
        .bind(admin_review.as_str())
        .bind(escalated.as_str())
        .fetch_one(&self.pool)
        .await?;

        let confidence_out_of_range = self
            .count("SELECT COUNT(*) FROM decision_log WHERE confidence < 0 OR confidence > 1")
            .await?;

        Ok(IntegrityCounts {
            issues_without_decisions,
            decisions_without_issues,
            invalid_decision_types,
            confidence_out_of_range,
        })
    }

    async fn decision_type_stats(&self) -> Result<Vec<DecisionTypeRow>, StoreError> {
        let rows: Vec<(String, i64, Option<f64>, Option<String>, Option<String>)> =
            sqlx::query_as(checked(
                "SELECT decision_type, COUNT(*), AVG(confidence), MIN(decided_at), MAX(decided_at)
                 FROM decision_log
                 GROUP BY decision_type
                 ORDER BY decision_type",
            )?)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(decision_type, count, avg_confidence, first_decision, last_decision)| {
                    DecisionTypeRow {
                        decision_type,
                        count,
                        avg_confidence,
                        first_decision,
                        last_decision,
                    }
                },
            )
            .collect())
    }

    async fn healing_stats(&self, executed_by: &str) -> Result<Vec<HealingStatRow>, StoreError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(checked(
            "SELECT action_type, execution_status, COUNT(*)
             FROM healing_actions
             WHERE executed_by = ?1
             GROUP BY action_type, execution_status
             ORDER BY action_type, execution_status",
        )?)
        .bind(executed_by)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(action_type, execution_status, count)| HealingStatRow {
                action_type,
                execution_status,
                count,
            })
            .collect())
    }

    async fn review_action_stats(&self) -> Result<Vec<ReviewActionRow>, StoreError> {
        let rows: Vec<(String, i64, Option<String>, Option<String>)> = sqlx::query_as(checked(
            "SELECT admin_action, COUNT(*), MIN(reviewed_at), MAX(reviewed_at)
             FROM admin_reviews
             GROUP BY admin_action
             ORDER BY admin_action",
        )?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(admin_action, count, first_review, last_review)| ReviewActionRow {
                    admin_action,
                    count,
                    first_review,
                    last_review,
                },
            )
            .collect())
    }

    async fn learning_stats(&self) -> Result<Vec<LearningStatRow>, StoreError> {
        let rows = sqlx::query_as::<_, LearningStatTuple>(checked(
            "SELECT issue_type, action_type, COUNT(*),
                    AVG(confidence_before), AVG(confidence_after),
                    AVG(confidence_after - confidence_before),
                    COALESCE(SUM(CASE WHEN outcome = ?1 THEN 1 ELSE 0 END), 0)
             FROM learning_history
             GROUP BY issue_type, action_type
             ORDER BY issue_type, action_type",
        )?)
        .bind("RESOLVED")
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    issue_type,
                    action_type,
                    total_records,
                    avg_confidence_before,
                    avg_confidence_after,
                    avg_improvement,
                    successful_outcomes,
                )| LearningStatRow {
                    issue_type,
                    action_type,
                    total_records,
                    avg_confidence_before,
                    avg_confidence_after,
                    avg_improvement,
                    successful_outcomes,
                },
            )
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Single-connection write pool.
pub struct SqliteWriter {
    pool: SqlitePool,
}

fn outcome(rows_affected: u64, target_table: &'static str, key: &str) -> InsertOutcome {
    if rows_affected == 0 {
        debug!(table = target_table, key, "row already present, insert skipped");
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    }
}

#[async_trait]
impl WriteStore for SqliteWriter {
    async fn insert_decision(&self, decision: &Decision) -> Result<InsertOutcome, StoreError> {
        safety::validate_write("INSERT", table::DECISION_LOG)?;

        let result = sqlx::query(
            "INSERT INTO decision_log (id, issue_id, decision_type, reason, confidence, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT DO NOTHING",
        )
        .bind(&decision.id)
        .bind(&decision.issue_id)
        .bind(decision.decision_type.as_str())
        .bind(&decision.reason)
        .bind(decision.confidence)
        .bind(&decision.decided_at)
        .execute(&self.pool)
        .await?;

        Ok(outcome(
            result.rows_affected(),
            table::DECISION_LOG,
            &decision.issue_id,
        ))
    }

    async fn insert_healing_action(
        &self,
        action: &HealingAction,
    ) -> Result<InsertOutcome, StoreError> {
        safety::validate_write("INSERT", table::HEALING_ACTIONS)?;
        safety::validate_healing_action(
            action.action_type.as_str(),
            action.execution_mode.as_str(),
        )?;

        let result = sqlx::query(
            "INSERT INTO healing_actions
                (id, decision_id, action_type, execution_mode, executed_by,
                 execution_status, executed_at, simulation_details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT DO NOTHING",
        )
        .bind(&action.id)
        .bind(&action.decision_id)
        .bind(action.action_type.as_str())
        .bind(action.execution_mode.as_str())
        .bind(&action.executed_by)
        .bind(action.execution_status.as_str())
        .bind(&action.executed_at)
        .bind(&action.simulation_details)
        .execute(&self.pool)
        .await?;

        Ok(outcome(
            result.rows_affected(),
            table::HEALING_ACTIONS,
            &action.decision_id,
        ))
    }

    async fn insert_admin_review(
        &self,
        review: &AdminReview,
    ) -> Result<InsertOutcome, StoreError> {
        safety::validate_write("INSERT", table::ADMIN_REVIEWS)?;

        let recommendations = serde_json::to_string(&review.recommendations)?;
        let issue_context = serde_json::to_string(&review.issue_context)?;

        let result = sqlx::query(
            "INSERT INTO admin_reviews
                (id, decision_id, admin_action, admin_comment, override_flag, priority,
                 recommendations, escalation_reason, issue_context, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT DO NOTHING",
        )
        .bind(&review.id)
        .bind(&review.decision_id)
        .bind(&review.admin_action)
        .bind(review.admin_comment.as_deref())
        .bind(review.override_flag)
        .bind(review.priority.as_str())
        .bind(recommendations)
        .bind(&review.escalation_reason)
        .bind(issue_context)
        .bind(&review.reviewed_at)
        .execute(&self.pool)
        .await?;

        Ok(outcome(
            result.rows_affected(),
            table::ADMIN_REVIEWS,
            &review.decision_id,
        ))
    }

    async fn update_admin_review(
        &self,
        review_id: &str,
        disposition: &AdminDisposition,
    ) -> Result<bool, StoreError> {
        safety::validate_write("UPDATE", table::ADMIN_REVIEWS)?;

        let result = sqlx::query(
            "UPDATE admin_reviews
             SET admin_action = ?2, admin_comment = ?3, override_flag = ?4, reviewed_at = ?5
             WHERE id = ?1",
        )
        .bind(review_id)
        .bind(&disposition.admin_action)
        .bind(disposition.admin_comment.as_deref())
        .bind(disposition.override_flag)
        .bind(super::now_timestamp())
        .execute(&self.pool)
        .await?;

        let matched = result.rows_affected() > 0;
        if !matched {
            warn!(review_id, "no admin review matched update");
        }
        Ok(matched)
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

type IssueRow = (String, String, String, Option<f64>, Option<String>, String);

fn issue_from_row(row: IssueRow) -> Issue {
    let (id, issue_type, detection_source, raw_metric_value, raw_metric_unit, detected_at) = row;
    Issue {
        id,
        issue_type,
        detection_source,
        raw_metric_value,
        raw_metric_unit,
        detected_at,
    }
}

type PendingDecisionRow = (
    String,
    String,
    String,
    f64,
    String,
    String,
    String,
    Option<f64>,
    Option<String>,
    String,
);

fn pending_decision_from_row(row: PendingDecisionRow) -> PendingDecision {
    let (
        decision_id,
        issue_id,
        reason,
        confidence,
        decided_at,
        issue_type,
        detection_source,
        raw_metric_value,
        raw_metric_unit,
        detected_at,
    ) = row;
    PendingDecision {
        decision_id,
        issue_id,
        reason,
        confidence,
        decided_at,
        issue_type,
        detection_source,
        raw_metric_value,
        raw_metric_unit,
        detected_at,
    }
}

type DecisionRow = (String, String, String, String, f64, String);

fn decision_from_row(row: DecisionRow) -> Result<Decision, StoreError> {
    let (id, issue_id, decision_type, reason, confidence, decided_at) = row;
    let decision_type = DecisionType::parse(&decision_type).ok_or_else(|| StoreError::Decode {
        column: "decision_type",
        detail: format!("unknown decision type '{decision_type}'"),
    })?;
    Ok(Decision {
        id,
        issue_id,
        decision_type,
        reason,
        confidence,
        decided_at,
    })
}

type ReviewRow = (
    String,
    String,
    String,
    Option<String>,
    bool,
    String,
    String,
    String,
    String,
    String,
);

fn review_from_row(row: ReviewRow) -> Result<AdminReview, StoreError> {
    let (
        id,
        decision_id,
        admin_action,
        admin_comment,
        override_flag,
        priority,
        recommendations,
        escalation_reason,
        issue_context,
        reviewed_at,
    ) = row;

    let priority = Priority::parse(&priority).ok_or_else(|| StoreError::Decode {
        column: "priority",
        detail: format!("unknown priority '{priority}'"),
    })?;
    let recommendations: Recommendations =
        serde_json::from_str(&recommendations).map_err(|e| StoreError::Decode {
            column: "recommendations",
            detail: e.to_string(),
        })?;
    let issue_context: serde_json::Value =
        serde_json::from_str(&issue_context).map_err(|e| StoreError::Decode {
            column: "issue_context",
            detail: e.to_string(),
        })?;

    Ok(AdminReview {
        id,
        decision_id,
        admin_action,
        admin_comment,
        override_flag,
        priority,
        recommendations,
        escalation_reason,
        issue_context,
        reviewed_at,
    })
}

type PendingReviewRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<f64>,
    Option<String>,
    String,
);

fn pending_review_from_row(row: PendingReviewRow) -> PendingReview {
    let (
        review_id,
        decision_id,
        admin_action,
        priority,
        reviewed_at,
        issue_id,
        decision_reason,
        issue_type,
        detection_source,
        raw_metric_value,
        raw_metric_unit,
        detected_at,
    ) = row;
    PendingReview {
        review_id,
        decision_id,
        admin_action,
        priority,
        reviewed_at,
        issue_id,
        decision_reason,
        issue_type,
        detection_source,
        raw_metric_value,
        raw_metric_unit,
        detected_at,
    }
}

type LearningStatTuple = (
    String,
    String,
    i64,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    i64,
);

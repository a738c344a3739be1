use async_trait::async_trait;
use chrono::Utc;

use super::schema::Database;
use super::types::{to_timestamp, DatabaseError, RunRecord, RunRow};
use crate::detect::{RunLog, RunOutcome, RunStatus, StoreError};

impl Database {
    // ========================================================================
    // Refresh Run Log
    // ========================================================================

    pub async fn start_run(&self) -> Result<i64, DatabaseError> {
        let result = sqlx::query("INSERT INTO refresh_log (started_at, status) VALUES (?, ?)")
            .bind(to_timestamp(Utc::now()))
            .bind(RunStatus::Running.as_str())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn complete_run(&self, run_id: i64, outcome: &RunOutcome) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
                UPDATE refresh_log
                SET completed_at = ?, total_features = ?, new_features = ?,
                    changed_features = ?, status = ?, error_message = ?, source = ?
                WHERE id = ?
            "#,
        )
        .bind(to_timestamp(Utc::now()))
        .bind(outcome.total as i64)
        .bind(outcome.new_count as i64)
        .bind(outcome.changed_count as i64)
        .bind(outcome.status.as_str())
        .bind(&outcome.error)
        .bind(outcome.source.map(|s| s.as_str()))
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, DatabaseError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
                SELECT id, started_at, completed_at, total_features, new_features,
                       changed_features, status, error_message, source
                FROM refresh_log
                ORDER BY started_at DESC, id DESC
                LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(RunRow::into_record).collect()
    }
}

#[async_trait]
impl RunLog for Database {
    async fn start(&self) -> Result<i64, StoreError> {
        Ok(self.start_run().await?)
    }

    async fn complete(&self, run_id: i64, outcome: &RunOutcome) -> Result<(), StoreError> {
        Ok(self.complete_run(run_id, outcome).await?)
    }
}

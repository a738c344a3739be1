use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{to_timestamp, ChangeRow, DatabaseError, LoggedChange};
use crate::detect::ChangeEvent;

const CHANGE_COLUMNS: &str = "id, release_plan_id, feature_name, product_name, change_type, \
                              field_changed, old_value, new_value, detected_at";

impl Database {
    // ========================================================================
    // Change Log Operations
    // ========================================================================

    pub async fn append_change(&self, event: &ChangeEvent) -> Result<i64, DatabaseError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        insert_change(&mut conn, event)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Changes detected at or after `since`, newest first
    pub async fn recent_changes(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LoggedChange>, DatabaseError> {
        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            "SELECT {CHANGE_COLUMNS} FROM change_log WHERE detected_at >= ? ORDER BY detected_at DESC, id DESC LIMIT ?"
        ))
        .bind(to_timestamp(since))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(ChangeRow::into_logged).collect()
    }

    /// Full change history of one feature, newest first
    pub async fn changes_for_feature(
        &self,
        release_plan_id: &str,
    ) -> Result<Vec<LoggedChange>, DatabaseError> {
        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            "SELECT {CHANGE_COLUMNS} FROM change_log WHERE release_plan_id = ? ORDER BY detected_at DESC, id DESC"
        ))
        .bind(release_plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(ChangeRow::into_logged).collect()
    }

    /// Ids with any change logged at or after `since`
    pub async fn changed_feature_ids(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT release_plan_id FROM change_log WHERE detected_at >= ?")
                .bind(to_timestamp(since))
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Inserts one change_log row on `conn`, so callers can share a transaction
pub(super) async fn insert_change(
    conn: &mut SqliteConnection,
    event: &ChangeEvent,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO change_log
                (release_plan_id, feature_name, product_name, change_type,
                 field_changed, old_value, new_value, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.release_plan_id)
    .bind(&event.feature_name)
    .bind(&event.product_name)
    .bind(event.change_type.as_str())
    .bind(event.field_changed.map(|f| f.name()))
    .bind(&event.old_value)
    .bind(&event.new_value)
    .bind(to_timestamp(event.detected_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

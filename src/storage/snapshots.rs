use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::changes::insert_change;
use super::schema::Database;
use super::types::{from_timestamp, to_timestamp, DatabaseError};
use crate::detect::{ChangeEvent, SaveOutcome, Snapshot, SnapshotStore, StoreError};
use crate::feed::FeatureRecord;

impl Database {
    // ========================================================================
    // Snapshot Operations
    // ========================================================================

    /// Latest stored snapshot for a release plan id
    pub async fn latest_snapshot(
        &self,
        release_plan_id: &str,
    ) -> Result<Option<Snapshot>, DatabaseError> {
        let row: Option<(i64, String, i64)> = sqlx::query_as(
            r#"
                SELECT version, snapshot_data, fetched_at
                FROM feature_snapshots
                WHERE release_plan_id = ?
                ORDER BY version DESC
                LIMIT 1
            "#,
        )
        .bind(release_plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some((version, data, fetched_at)) = row else {
            return Ok(None);
        };
        let record: FeatureRecord =
            serde_json::from_str(&data).map_err(|e| DatabaseError::Corrupt {
                id: release_plan_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Some(Snapshot {
            release_plan_id: release_plan_id.to_string(),
            version,
            record,
            fetched_at: from_timestamp(fetched_at),
        }))
    }

    /// Compare-and-set snapshot write, committed with its change events.
    ///
    /// Inserts version `expected + 1` only while the stored latest version is
    /// still `expected` (0 when none). The UNIQUE(release_plan_id, version)
    /// constraint settles races between writers that both passed the check.
    /// The snapshot row and the `events` rows share one transaction; a
    /// conflict or any failed insert rolls back all of them.
    pub async fn save_snapshot(
        &self,
        release_plan_id: &str,
        expected_version: Option<i64>,
        record: &FeatureRecord,
        events: &[ChangeEvent],
        fetched_at: DateTime<Utc>,
    ) -> Result<SaveOutcome, DatabaseError> {
        let expected = expected_version.unwrap_or(0);
        let version = expected + 1;
        let data = serde_json::to_string(record).map_err(|e| DatabaseError::Corrupt {
            id: release_plan_id.to_string(),
            reason: e.to_string(),
        })?;

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let result = sqlx::query(
            r#"
                INSERT INTO feature_snapshots (release_plan_id, version, snapshot_data, fetched_at)
                SELECT ?1, ?2, ?3, ?4
                WHERE COALESCE(
                    (SELECT MAX(version) FROM feature_snapshots WHERE release_plan_id = ?1),
                    0
                ) = ?5
                ON CONFLICT(release_plan_id, version) DO NOTHING
            "#,
        )
        .bind(release_plan_id)
        .bind(version)
        .bind(&data)
        .bind(to_timestamp(fetched_at))
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            tracing::debug!(id = %release_plan_id, expected, "Snapshot write lost the race");
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(SaveOutcome::Conflict);
        }

        for event in events {
            insert_change(&mut tx, event)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        }
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(SaveOutcome::Saved { version })
    }

    /// Number of distinct features with at least one snapshot
    pub async fn snapshot_count(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT release_plan_id) FROM feature_snapshots")
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(count)
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn latest(&self, release_plan_id: &str) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.latest_snapshot(release_plan_id).await?)
    }

    async fn save(
        &self,
        release_plan_id: &str,
        expected_version: Option<i64>,
        record: &FeatureRecord,
        events: &[ChangeEvent],
    ) -> Result<SaveOutcome, StoreError> {
        Ok(self
            .save_snapshot(release_plan_id, expected_version, record, events, Utc::now())
            .await?)
    }
}

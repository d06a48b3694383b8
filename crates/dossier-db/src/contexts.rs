//! Context document and history repository.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use dossier_core::{
    AppliedBy, ChangeRecord, ContextRepository, ContextSnapshot, Error, HistoryEntry,
    NewHistoryEntry, Result,
};

/// PostgreSQL implementation of ContextRepository.
pub struct PgContextRepository {
    pool: Pool<Postgres>,
}

impl PgContextRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_history_row(row: sqlx::postgres::PgRow) -> Result<HistoryEntry> {
        let changes: Option<JsonValue> = row.get("changes");
        let conflicts: Option<JsonValue> = row.get("conflicts");
        let applied_by: String = row.get("applied_by");

        Ok(HistoryEntry {
            id: row.get("id"),
            engineer_id: row.get("engineer_id"),
            context: row.get("context"),
            changes: changes
                .map(serde_json::from_value::<Vec<ChangeRecord>>)
                .transpose()?,
            conflicts: conflicts
                .map(serde_json::from_value::<Vec<String>>)
                .transpose()?,
            applied_by: applied_by.parse()?,
            version: row.get("version"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ContextRepository for PgContextRepository {
    async fn get_current(&self, engineer_id: i64) -> Result<Option<ContextSnapshot>> {
        let row = sqlx::query(
            "SELECT engineer_id, context, version, updated_at
             FROM engineer_contexts WHERE engineer_id = $1",
        )
        .bind(engineer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| ContextSnapshot {
            engineer_id: row.get("engineer_id"),
            context: row.get("context"),
            version: row.get("version"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn upsert_current(
        &self,
        engineer_id: i64,
        context: &JsonValue,
        applied_by: AppliedBy,
    ) -> Result<i32> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let version: i32 = sqlx::query_scalar(
            "INSERT INTO engineer_contexts (engineer_id, context, version, updated_at)
             VALUES ($1, $2, 1, $3)
             ON CONFLICT (engineer_id) DO UPDATE
             SET context = EXCLUDED.context,
                 version = engineer_contexts.version + 1,
                 updated_at = EXCLUDED.updated_at
             RETURNING version",
        )
        .bind(engineer_id)
        .bind(context)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO context_history (engineer_id, context, applied_by, version, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(engineer_id)
        .bind(context)
        .bind(applied_by.as_str())
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "contexts",
            engineer_id,
            version,
            applied_by = %applied_by,
            "Context stored"
        );
        Ok(version)
    }

    async fn replace_current(
        &self,
        engineer_id: i64,
        expected_version: i32,
        context: &JsonValue,
        applied_by: AppliedBy,
    ) -> Result<i32> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let written: Option<i32> = if expected_version == 0 {
            sqlx::query_scalar(
                "INSERT INTO engineer_contexts (engineer_id, context, version, updated_at)
                 VALUES ($1, $2, 1, $3)
                 ON CONFLICT (engineer_id) DO NOTHING
                 RETURNING version",
            )
            .bind(engineer_id)
            .bind(context)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
        } else {
            sqlx::query_scalar(
                "UPDATE engineer_contexts
                 SET context = $2, version = version + 1, updated_at = $3
                 WHERE engineer_id = $1 AND version = $4
                 RETURNING version",
            )
            .bind(engineer_id)
            .bind(context)
            .bind(now)
            .bind(expected_version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
        };

        let Some(version) = written else {
            let actual: Option<i32> = sqlx::query_scalar(
                "SELECT version FROM engineer_contexts WHERE engineer_id = $1",
            )
            .bind(engineer_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
            tx.rollback().await.map_err(Error::Database)?;

            return Err(Error::VersionConflict {
                engineer_id,
                expected: expected_version,
                actual: actual.unwrap_or(0),
            });
        };

        sqlx::query(
            "INSERT INTO context_history (engineer_id, context, applied_by, version, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(engineer_id)
        .bind(context)
        .bind(applied_by.as_str())
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "contexts",
            engineer_id,
            version,
            applied_by = %applied_by,
            "Context replaced"
        );
        Ok(version)
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<i64> {
        let changes = entry.changes.as_ref().map(serde_json::to_value).transpose()?;
        let conflicts = entry
            .conflicts
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO context_history (engineer_id, context, changes, conflicts, applied_by, version, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(entry.engineer_id)
        .bind(&entry.context)
        .bind(changes)
        .bind(conflicts)
        .bind(entry.applied_by.as_str())
        .bind(entry.version)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn get_history(&self, engineer_id: i64) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, engineer_id, context, changes, conflicts, applied_by, version, created_at
             FROM context_history
             WHERE engineer_id = $1
             ORDER BY id DESC",
        )
        .bind(engineer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_history_row).collect()
    }

    async fn get_history_by_id(
        &self,
        engineer_id: i64,
        history_id: i64,
    ) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(
            "SELECT id, engineer_id, context, changes, conflicts, applied_by, version, created_at
             FROM context_history
             WHERE engineer_id = $1 AND id = $2",
        )
        .bind(engineer_id)
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_history_row).transpose()
    }
}

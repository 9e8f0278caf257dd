//! PostgreSQL-backed saga store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId, Version};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::compensation::{CompensationLogEntry, CompensationOutcome};
use crate::error::{Result, SagaStoreError};
use crate::instance::SagaInstance;
use crate::store::SagaStore;

/// PostgreSQL [`SagaStore`].
///
/// The instance is stored as a JSONB document alongside indexed columns
/// for the correlation key, state, and version; the version column is
/// the compare-and-swap guard.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_instance(row: PgRow) -> Result<SagaInstance> {
        let data: serde_json::Value = row.try_get("data")?;
        Ok(serde_json::from_value(data)?)
    }

    fn row_to_log_entry(row: PgRow) -> Result<CompensationLogEntry> {
        let step: String = row.try_get("step")?;
        let outcome: String = row.try_get("outcome")?;
        Ok(CompensationLogEntry {
            entry_id: row.try_get::<Uuid, _>("entry_id")?,
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            step: step
                .parse()
                .map_err(|e: String| SagaStoreError::Serialization(serde::de::Error::custom(e)))?,
            attempt: row.try_get::<i32, _>("attempt")? as u32,
            outcome: outcome
                .parse()
                .map_err(|e: String| SagaStoreError::Serialization(serde::de::Error::custom(e)))?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn create(&self, instance: &SagaInstance) -> Result<()> {
        let data = serde_json::to_value(instance)?;

        sqlx::query(
            r#"
            INSERT INTO sagas (saga_id, order_id, state, version, created_at, updated_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(instance.saga_id().as_uuid())
        .bind(instance.order_id().as_uuid())
        .bind(instance.state().as_str())
        .bind(instance.version().as_i64())
        .bind(instance.created_at())
        .bind(instance.updated_at())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return SagaStoreError::AlreadyExists(instance.order_id());
            }
            SagaStoreError::Database(e)
        })?;

        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query("SELECT data FROM sagas WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_instance).transpose()
    }

    async fn load_by_order(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query("SELECT data FROM sagas WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_instance).transpose()
    }

    async fn compare_and_swap(&self, instance: &SagaInstance) -> Result<Version> {
        let new_version = instance.version().next();
        let mut updated = instance.clone();
        updated.version = new_version;
        let data = serde_json::to_value(&updated)?;

        let result = sqlx::query(
            r#"
            UPDATE sagas
            SET state = $1, version = $2, updated_at = $3, data = $4
            WHERE saga_id = $5 AND version = $6
            "#,
        )
        .bind(updated.state().as_str())
        .bind(new_version.as_i64())
        .bind(updated.updated_at())
        .bind(data)
        .bind(updated.saga_id().as_uuid())
        .bind(instance.version().as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either a concurrent writer advanced the row or it is gone.
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM sagas WHERE saga_id = $1")
                    .bind(instance.saga_id().as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            return match actual {
                Some(actual) => {
                    tracing::debug!(
                        saga_id = %instance.saga_id(),
                        expected = %instance.version(),
                        actual,
                        "compare-and-swap lost"
                    );
                    Err(SagaStoreError::Conflict {
                        saga_id: instance.saga_id(),
                        expected: instance.version(),
                        actual: Version::new(actual),
                    })
                }
                None => Err(SagaStoreError::NotFound(instance.saga_id())),
            };
        }

        Ok(new_version)
    }

    async fn list_in_flight(&self) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM sagas
            WHERE state NOT IN ('completed', 'compensated', 'compensation_failed')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_instance).collect()
    }

    async fn append_compensation(&self, entry: &CompensationLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO compensation_log
                (entry_id, saga_id, step, attempt, outcome, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.saga_id.as_uuid())
        .bind(entry.step.as_str())
        .bind(entry.attempt as i32)
        .bind(entry.outcome.as_str())
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_compensation(
        &self,
        entry_id: Uuid,
        outcome: CompensationOutcome,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE compensation_log SET outcome = $1, finished_at = $2 WHERE entry_id = $3",
        )
        .bind(outcome.as_str())
        .bind(Utc::now())
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SagaStoreError::LogEntryNotFound(entry_id));
        }
        Ok(())
    }

    async fn compensation_log(&self, saga_id: SagaId) -> Result<Vec<CompensationLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, saga_id, step, attempt, outcome, started_at, finished_at
            FROM compensation_log
            WHERE saga_id = $1
            ORDER BY started_at ASC, attempt ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_log_entry).collect()
    }
}

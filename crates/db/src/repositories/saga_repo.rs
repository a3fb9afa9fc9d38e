//! Repository for the `sagas` and `saga_event_states` tables.

use gdc_core::saga::{EventOutcome, Saga, SagaEventState, SagaState, SagaStatus};
use gdc_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use super::PgTx;
use crate::models::saga::{SagaEventStateRow, SagaRow};

/// Column list for the `sagas` table.
const COLUMNS: &str = "id, saga_name, student_id, fileset_id, file_type, pen, status, saga_state, \
    payload, retry_count, step, last_error, created_at, updated_at";

/// Column list for the `saga_event_states` table.
const EVENT_COLUMNS: &str = "id, saga_id, step_number, event_type, outcome, detail, created_at";

pub struct SagaRepo;

impl SagaRepo {
    pub async fn exists(pool: &PgPool, student_id: DbId, saga_name: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM sagas WHERE student_id = $1 AND saga_name = $2)",
        )
        .bind(student_id)
        .bind(saga_name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<SagaRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sagas WHERE id = $1");
        sqlx::query_as::<_, SagaRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Non-terminal sagas not updated since `older_than`, oldest first.
    pub async fn find_stalled(
        pool: &PgPool,
        older_than: Timestamp,
        limit: i64,
    ) -> Result<Vec<SagaRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sagas \
             WHERE status IN ('INITIATED', 'IN_PROGRESS') AND updated_at < $1 \
             ORDER BY updated_at \
             LIMIT $2"
        );
        sqlx::query_as::<_, SagaRow>(&query)
            .bind(older_than)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn list_by_status(pool: &PgPool, status: SagaStatus, limit: i64) -> Result<Vec<SagaRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sagas WHERE status = $1 ORDER BY updated_at LIMIT $2"
        );
        sqlx::query_as::<_, SagaRow>(&query)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn list_event_states(pool: &PgPool, saga_id: DbId) -> Result<Vec<SagaEventStateRow>, sqlx::Error> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM saga_event_states WHERE saga_id = $1 ORDER BY step_number"
        );
        sqlx::query_as::<_, SagaEventStateRow>(&query)
            .bind(saga_id)
            .fetch_all(pool)
            .await
    }

    pub async fn event_state_exists(
        pool: &PgPool,
        saga_id: DbId,
        event_type: SagaState,
        outcome: EventOutcome,
        step_number: i32,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS( \
                SELECT 1 FROM saga_event_states \
                WHERE saga_id = $1 AND event_type = $2 AND outcome = $3 AND step_number = $4)",
        )
        .bind(saga_id)
        .bind(event_type.as_str())
        .bind(outcome.as_str())
        .bind(step_number)
        .fetch_one(pool)
        .await
    }

    /// Delete terminal sagas untouched since `cutoff` whose student record
    /// no longer exists. Log entries cascade.
    pub async fn delete_orphaned(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM sagas s \
             WHERE s.status IN ('COMPLETED', 'ERROR') AND s.updated_at < $1 \
               AND NOT EXISTS (SELECT 1 FROM fileset_students fs WHERE fs.id = s.student_id)",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------------
    // Transaction-scoped writes
    // -----------------------------------------------------------------------

    /// Insert a saga. Returns `false` if a unique index (one active saga per
    /// student and name) rejected it.
    pub async fn insert(tx: &mut PgTx<'_>, saga: &Saga) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO sagas ( \
                id, saga_name, student_id, fileset_id, file_type, pen, status, saga_state, \
                payload, retry_count, step, last_error, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT DO NOTHING",
        )
        .bind(saga.id)
        .bind(&saga.saga_name)
        .bind(saga.student_id)
        .bind(saga.fileset_id)
        .bind(saga.file_type.as_str())
        .bind(saga.pen.as_deref())
        .bind(saga.status.as_str())
        .bind(saga.state.as_str())
        .bind(Json(&saga.payload))
        .bind(saga.retry_count)
        .bind(saga.step)
        .bind(saga.last_error.as_deref())
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the mutable saga columns, provided the stored step is still
    /// `expected_step`.
    pub async fn update(tx: &mut PgTx<'_>, saga: &Saga, expected_step: i32) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sagas SET \
                status = $2, saga_state = $3, retry_count = $4, step = $5, \
                last_error = $6, updated_at = $7 \
             WHERE id = $1 AND step = $8",
        )
        .bind(saga.id)
        .bind(saga.status.as_str())
        .bind(saga.state.as_str())
        .bind(saga.retry_count)
        .bind(saga.step)
        .bind(saga.last_error.as_deref())
        .bind(saga.updated_at)
        .bind(expected_step)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append one log entry. Returns `false` if the step is already logged.
    pub async fn insert_event_state(tx: &mut PgTx<'_>, entry: &SagaEventState) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO saga_event_states \
                (id, saga_id, step_number, event_type, outcome, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (saga_id, step_number) DO NOTHING",
        )
        .bind(entry.id)
        .bind(entry.saga_id)
        .bind(entry.step_number)
        .bind(entry.event_type.as_str())
        .bind(entry.outcome.as_str())
        .bind(entry.detail.as_deref())
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

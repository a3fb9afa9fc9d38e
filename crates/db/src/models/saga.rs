//! Saga and saga event-state entity models.

use gdc_core::fileset::FileType;
use gdc_core::saga::{EventOutcome, Saga, SagaEventState, SagaState, SagaStatus, ValidationPayload};
use gdc_core::store::StoreError;
use gdc_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `sagas` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SagaRow {
    pub id: DbId,
    pub saga_name: String,
    pub student_id: DbId,
    pub fileset_id: DbId,
    pub file_type: String,
    pub pen: Option<String>,
    pub status: String,
    pub saga_state: String,
    pub payload: Json<ValidationPayload>,
    pub retry_count: i32,
    pub step: i32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<SagaRow> for Saga {
    type Error = StoreError;

    fn try_from(row: SagaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            saga_name: row.saga_name,
            student_id: row.student_id,
            fileset_id: row.fileset_id,
            file_type: parse_column("sagas.file_type", &row.file_type, FileType::parse)?,
            pen: row.pen,
            status: parse_column("sagas.status", &row.status, SagaStatus::parse)?,
            state: parse_column("sagas.saga_state", &row.saga_state, SagaState::parse)?,
            payload: row.payload.0,
            retry_count: row.retry_count,
            step: row.step,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from the `saga_event_states` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SagaEventStateRow {
    pub id: DbId,
    pub saga_id: DbId,
    pub step_number: i32,
    pub event_type: String,
    pub outcome: String,
    pub detail: Option<String>,
    pub created_at: Timestamp,
}

impl TryFrom<SagaEventStateRow> for SagaEventState {
    type Error = StoreError;

    fn try_from(row: SagaEventStateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            saga_id: row.saga_id,
            step_number: row.step_number,
            event_type: parse_column("saga_event_states.event_type", &row.event_type, SagaState::parse)?,
            outcome: parse_column("saga_event_states.outcome", &row.outcome, EventOutcome::parse)?,
            detail: row.detail,
            created_at: row.created_at,
        })
    }
}

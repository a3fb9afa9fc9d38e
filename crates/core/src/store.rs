//! Persistence seams. `gdc-db` implements these on PostgreSQL; the pipeline
//! crate carries an in-memory implementation used by its tests.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::fileset::{FileType, Fileset, FilesetKey, FilesetStatus, ReportingPeriod};
use crate::finalize::ErrorStudentFlag;
use crate::reconcile::{FilesetChange, ParsedUpload};
use crate::saga::{EventOutcome, Saga, SagaEventState, SagaState, SagaStatus, ValidationResult};
use crate::student::{AnyStudent, DemographicStudent};
use crate::types::{DbId, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// A uniqueness or concurrency guard rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait FilesetStore: Send + Sync {
    /// Reporting period whose school-year or summer window contains `on`.
    async fn active_reporting_period(&self, on: NaiveDate) -> Result<Option<ReportingPeriod>, StoreError>;

    /// Reconcile `upload` into the fileset for `key` in one exclusive write:
    /// supersede a COMPLETED predecessor, clear the file type's students and
    /// error-student flags, insert the new records.
    async fn replace_file(&self, key: FilesetKey, upload: ParsedUpload) -> Result<FilesetChange, StoreError>;

    async fn find_fileset(&self, id: DbId) -> Result<Option<Fileset>, StoreError>;

    async fn list_filesets_by_status(&self, status: FilesetStatus) -> Result<Vec<Fileset>, StoreError>;

    /// Persist per-file and aggregate statuses. Guarded on
    /// `fileset.updated_at`: returns `false` if the fileset is gone or was
    /// written after this copy was read.
    async fn save_fileset_status(&self, fileset: &Fileset) -> Result<bool, StoreError>;

    /// Save a COMPLETED fileset and replace its error-student flags with
    /// `flags` in one write, serialized with ingest on the fileset key.
    /// Guarded like [`save_fileset_status`](Self::save_fileset_status): on
    /// `false` nothing was written.
    async fn complete_fileset(&self, fileset: &Fileset, flags: &[ErrorStudentFlag]) -> Result<bool, StoreError>;

    /// Delete LOADED filesets untouched since `cutoff`, and SUPERSEDED ones
    /// replaced before it, with everything they own. Returns the number of
    /// filesets removed.
    async fn purge_stale_filesets(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn find_student(&self, id: DbId) -> Result<Option<AnyStudent>, StoreError>;

    async fn list_students(
        &self,
        fileset_id: DbId,
        file_type: Option<FileType>,
    ) -> Result<Vec<AnyStudent>, StoreError>;

    async fn find_demographic_by_pen(
        &self,
        fileset_id: DbId,
        pen: &str,
    ) -> Result<Option<DemographicStudent>, StoreError>;

    /// Students of `file_type` in the fileset without a terminal saga.
    async fn unsettled_students(&self, fileset_id: DbId, file_type: FileType) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn saga_exists(&self, student_id: DbId, saga_name: &str) -> Result<bool, StoreError>;

    /// Insert a saga with its first log entry. Returns `false` when a saga
    /// for the same student and name already exists.
    async fn create_saga(&self, saga: &Saga, entry: &SagaEventState) -> Result<bool, StoreError>;

    async fn find_saga(&self, id: DbId) -> Result<Option<Saga>, StoreError>;

    /// Persist status and bookkeeping columns of a saga whose log has not
    /// moved past `saga.step`. Returns `false` when another writer logged a
    /// newer step first (or the saga is gone); the caller's copy is stale.
    async fn update_saga(&self, saga: &Saga) -> Result<bool, StoreError>;

    /// Persist an accepted transition: the saga row, its new log entries
    /// and, when present, the validation result on the student record.
    /// Returns `false` when another writer already logged the same step.
    async fn record_transition(
        &self,
        saga: &Saga,
        entries: &[SagaEventState],
        result: Option<&ValidationResult>,
    ) -> Result<bool, StoreError>;

    async fn event_states(&self, saga_id: DbId) -> Result<Vec<SagaEventState>, StoreError>;

    /// Whether the log holds `(event_type, outcome)` at `step_number`.
    async fn event_state_exists(
        &self,
        saga_id: DbId,
        event_type: SagaState,
        outcome: EventOutcome,
        step_number: i32,
    ) -> Result<bool, StoreError>;

    /// Non-terminal sagas not updated since `older_than`, oldest first.
    async fn find_stalled_sagas(&self, older_than: Timestamp, limit: i64) -> Result<Vec<Saga>, StoreError>;

    async fn list_sagas_by_status(&self, status: SagaStatus, limit: i64) -> Result<Vec<Saga>, StoreError>;

    /// Delete terminal sagas whose student record was replaced, if untouched
    /// since `cutoff`. Returns the number removed.
    async fn purge_orphaned_sagas(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ErrorStudentStore: Send + Sync {
    async fn list_error_students(&self, fileset_id: DbId) -> Result<Vec<ErrorStudentFlag>, StoreError>;
}

/// Everything the pipeline needs from storage.
pub trait Store: FilesetStore + StudentStore + SagaStore + ErrorStudentStore {}

impl<T> Store for T where T: FilesetStore + StudentStore + SagaStore + ErrorStudentStore {}

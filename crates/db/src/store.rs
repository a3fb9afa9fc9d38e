//! [`PgStore`]: the core store traits on PostgreSQL.
//!
//! Reconcile writes and fileset completion each run in one transaction
//! guarded by a transaction-scoped advisory lock on the fileset key, so
//! uploads and completions for the same school and period are applied one
//! after the other.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use gdc_core::fileset::{FileType, Fileset, FilesetKey, FilesetStatus, ReportingPeriod};
use gdc_core::finalize::ErrorStudentFlag;
use gdc_core::reconcile::{self, FilesetChange, ParsedUpload};
use gdc_core::saga::{EventOutcome, Saga, SagaEventState, SagaState, SagaStatus, ValidationResult, VALIDATION_SAGA};
use gdc_core::store::{ErrorStudentStore, FilesetStore, SagaStore, StoreError, StudentStore};
use gdc_core::student::{AnyStudent, DemographicStudent};
use gdc_core::types::{DbId, Timestamp};

use crate::repositories::{ErrorStudentRepo, FilesetRepo, ReportingPeriodRepo, SagaRepo, StudentRepo};
use crate::DbPool;

/// Map a driver error onto the core error. Unique violations are races
/// between writers and surface as conflicts.
fn backend(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Insert or refresh a reporting period.
    pub async fn save_reporting_period(&self, period: &ReportingPeriod) -> Result<(), StoreError> {
        ReportingPeriodRepo::upsert(&self.pool, period).await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl FilesetStore for PgStore {
    async fn active_reporting_period(&self, on: NaiveDate) -> Result<Option<ReportingPeriod>, StoreError> {
        let row = ReportingPeriodRepo::find_active(&self.pool, on).await.map_err(backend)?;
        Ok(row.map(ReportingPeriod::from))
    }

    async fn replace_file(&self, key: FilesetKey, upload: ParsedUpload) -> Result<FilesetChange, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        FilesetRepo::lock_key(&mut tx, &key).await.map_err(backend)?;

        let loaded = FilesetRepo::find_current_for_update(&mut tx, &key, FilesetStatus::Loaded)
            .await
            .map_err(backend)?
            .map(Fileset::try_from)
            .transpose()?;
        let completed = FilesetRepo::find_current_for_update(&mut tx, &key, FilesetStatus::Completed)
            .await
            .map_err(backend)?
            .map(Fileset::try_from)
            .transpose()?;

        let mut change = reconcile::apply(key, loaded, completed.as_ref(), upload, Utc::now());

        if let Some(old) = change.superseded {
            FilesetRepo::mark_superseded(&mut tx, old).await.map_err(backend)?;
        }
        // Keep the stored timestamps, which later status saves are guarded on.
        let row = FilesetRepo::upsert(&mut tx, &change.fileset).await.map_err(backend)?;
        change.fileset = Fileset::try_from(row)?;
        let removed = StudentRepo::delete_by_file_type(&mut tx, change.fileset.id, change.file_type)
            .await
            .map_err(backend)?;
        ErrorStudentRepo::delete_by_fileset(&mut tx, change.fileset.id)
            .await
            .map_err(backend)?;
        StudentRepo::insert_many(&mut tx, &change.students).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        tracing::debug!(
            fileset_id = %change.fileset.id,
            file_type = %change.file_type,
            removed,
            inserted = change.students.len(),
            "Fileset file replaced",
        );
        Ok(change)
    }

    async fn find_fileset(&self, id: DbId) -> Result<Option<Fileset>, StoreError> {
        FilesetRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(Fileset::try_from)
            .transpose()
    }

    async fn list_filesets_by_status(&self, status: FilesetStatus) -> Result<Vec<Fileset>, StoreError> {
        let rows = FilesetRepo::list_by_status(&self.pool, status).await.map_err(backend)?;
        convert(rows)
    }

    async fn save_fileset_status(&self, fileset: &Fileset) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let updated = FilesetRepo::update_status(&mut tx, fileset).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn complete_fileset(&self, fileset: &Fileset, flags: &[ErrorStudentFlag]) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        FilesetRepo::lock_key(&mut tx, &fileset.key).await.map_err(backend)?;
        if !FilesetRepo::update_status(&mut tx, fileset).await.map_err(backend)? {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }
        let cleared = ErrorStudentRepo::delete_by_fileset(&mut tx, fileset.id)
            .await
            .map_err(backend)?;
        let inserted = ErrorStudentRepo::insert_many(&mut tx, flags).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        tracing::debug!(fileset_id = %fileset.id, cleared, inserted, "Fileset flags replaced");
        Ok(true)
    }

    async fn purge_stale_filesets(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        FilesetRepo::delete_stale(&self.pool, cutoff).await.map_err(backend)
    }
}

#[async_trait]
impl StudentStore for PgStore {
    async fn find_student(&self, id: DbId) -> Result<Option<AnyStudent>, StoreError> {
        StudentRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(AnyStudent::try_from)
            .transpose()
    }

    async fn list_students(
        &self,
        fileset_id: DbId,
        file_type: Option<FileType>,
    ) -> Result<Vec<AnyStudent>, StoreError> {
        let rows = StudentRepo::list(&self.pool, fileset_id, file_type).await.map_err(backend)?;
        convert(rows)
    }

    async fn find_demographic_by_pen(
        &self,
        fileset_id: DbId,
        pen: &str,
    ) -> Result<Option<DemographicStudent>, StoreError> {
        let row = StudentRepo::find_demographic_by_pen(&self.pool, fileset_id, pen)
            .await
            .map_err(backend)?;
        match row.map(AnyStudent::try_from).transpose()? {
            Some(AnyStudent::Demographic(dem)) => Ok(Some(dem)),
            Some(other) => Err(StoreError::Corrupt(format!(
                "student {} indexed as DEM holds a {} record",
                other.id(),
                other.file_type()
            ))),
            None => Ok(None),
        }
    }

    async fn unsettled_students(&self, fileset_id: DbId, file_type: FileType) -> Result<u64, StoreError> {
        let count = StudentRepo::count_unsettled(&self.pool, fileset_id, file_type, VALIDATION_SAGA)
            .await
            .map_err(backend)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl SagaStore for PgStore {
    async fn saga_exists(&self, student_id: DbId, saga_name: &str) -> Result<bool, StoreError> {
        SagaRepo::exists(&self.pool, student_id, saga_name).await.map_err(backend)
    }

    async fn create_saga(&self, saga: &Saga, entry: &SagaEventState) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if !SagaRepo::insert(&mut tx, saga).await.map_err(backend)? {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }
        SagaRepo::insert_event_state(&mut tx, entry).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn find_saga(&self, id: DbId) -> Result<Option<Saga>, StoreError> {
        SagaRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(Saga::try_from)
            .transpose()
    }

    async fn update_saga(&self, saga: &Saga) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let updated = SagaRepo::update(&mut tx, saga, saga.step).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn record_transition(
        &self,
        saga: &Saga,
        entries: &[SagaEventState],
        result: Option<&ValidationResult>,
    ) -> Result<bool, StoreError> {
        let Some(first) = entries.first() else {
            return Ok(false);
        };
        let expected_step = first.step_number - 1;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for entry in entries {
            if !SagaRepo::insert_event_state(&mut tx, entry).await.map_err(backend)? {
                tx.rollback().await.map_err(backend)?;
                return Ok(false);
            }
        }
        if !SagaRepo::update(&mut tx, saga, expected_step).await.map_err(backend)? {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }
        if let Some(result) = result {
            if !StudentRepo::apply_result(&mut tx, result).await.map_err(backend)? {
                tracing::debug!(
                    saga_id = %saga.id,
                    student_id = %result.student_id,
                    "Student gone before its result was written",
                );
            }
        }
        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn event_states(&self, saga_id: DbId) -> Result<Vec<SagaEventState>, StoreError> {
        let rows = SagaRepo::list_event_states(&self.pool, saga_id).await.map_err(backend)?;
        convert(rows)
    }

    async fn event_state_exists(
        &self,
        saga_id: DbId,
        event_type: SagaState,
        outcome: EventOutcome,
        step_number: i32,
    ) -> Result<bool, StoreError> {
        SagaRepo::event_state_exists(&self.pool, saga_id, event_type, outcome, step_number)
            .await
            .map_err(backend)
    }

    async fn find_stalled_sagas(&self, older_than: Timestamp, limit: i64) -> Result<Vec<Saga>, StoreError> {
        let rows = SagaRepo::find_stalled(&self.pool, older_than, limit).await.map_err(backend)?;
        convert(rows)
    }

    async fn list_sagas_by_status(&self, status: SagaStatus, limit: i64) -> Result<Vec<Saga>, StoreError> {
        let rows = SagaRepo::list_by_status(&self.pool, status, limit).await.map_err(backend)?;
        convert(rows)
    }

    async fn purge_orphaned_sagas(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        SagaRepo::delete_orphaned(&self.pool, cutoff).await.map_err(backend)
    }
}

#[async_trait]
impl ErrorStudentStore for PgStore {
    async fn list_error_students(&self, fileset_id: DbId) -> Result<Vec<ErrorStudentFlag>, StoreError> {
        let rows = ErrorStudentRepo::list_by_fileset(&self.pool, fileset_id)
            .await
            .map_err(backend)?;
        convert(rows)
    }
}

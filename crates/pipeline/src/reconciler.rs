//! File ingest: parse, reconcile into the current fileset, queue one saga
//! kick-off per new record.
//!
//! Ingests for the same fileset key are serialized in-process by
//! [`KeyedLocks`]; the store adds its own exclusive write scope so that
//! separate processes cannot interleave either. Kick-offs run on the
//! bounded [`WorkerPool`], so a large file waits for queue room instead of
//! spawning thousands of tasks.

use std::sync::Arc;

use gdc_core::error::{CoreError, UnprocessableReason};
use gdc_core::fileset::{FileType, FilesetKey, IngestTarget};
use gdc_core::reconcile;
use gdc_core::store::Store;
use gdc_core::student::FieldMap;
use gdc_core::types::{DbId, Timestamp};

use crate::error::PipelineError;
use crate::locks::KeyedLocks;
use crate::orchestrator::SagaOrchestrator;
use crate::pool::WorkerPool;

/// One uploaded file, already split into named fields per record.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub records: Vec<FieldMap>,
    pub target: IngestTarget,
    pub uploaded_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub fileset_id: DbId,
    pub file_type: FileType,
    /// A new fileset was opened for this upload.
    pub created: bool,
    /// COMPLETED fileset replaced by the new one.
    pub superseded: Option<DbId>,
    pub records: usize,
    /// Saga kick-offs handed to the worker pool.
    pub queued: usize,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    orchestrator: Arc<SagaOrchestrator>,
    pool: Arc<WorkerPool>,
    locks: KeyedLocks<FilesetKey>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, orchestrator: Arc<SagaOrchestrator>, pool: Arc<WorkerPool>) -> Self {
        Self {
            store,
            orchestrator,
            pool,
            locks: KeyedLocks::new(),
        }
    }

    /// Replace one file's records in the target's current fileset.
    ///
    /// Structural problems reject the whole file before anything is
    /// written. On success the previous records of the same file type, and
    /// the fileset's error-student flags, are gone.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestReport, PipelineError> {
        let Upload {
            file_name,
            records,
            target,
            uploaded_at,
        } = upload;

        let parsed = reconcile::parse_upload(&file_name, records, &target, uploaded_at)?;
        let upload_date = uploaded_at.date_naive();
        let period = self
            .store
            .active_reporting_period(upload_date)
            .await?
            .ok_or_else(|| {
                CoreError::unprocessable(
                    UnprocessableReason::NoActiveReportingPeriod,
                    format!("no reporting period covers {upload_date}"),
                )
            })?;

        let key = FilesetKey {
            owner: target.owner(),
            reporting_period_id: period.id,
        };
        let change = {
            let _guard = self.locks.lock(key).await;
            self.store
                .replace_file(key, parsed)
                .await
                .map_err(PipelineError::from_ingest_store)?
        };

        tracing::info!(
            fileset_id = %change.fileset.id,
            file_type = %change.file_type.as_str(),
            file_name = %file_name,
            records = change.students.len(),
            created = change.created,
            superseded = ?change.superseded,
            "File reconciled",
        );

        let records = change.students.len();
        let mut queued = 0;
        for student in change.students {
            let orchestrator = Arc::clone(&self.orchestrator);
            let mincode = student.header().mincode.clone();
            self.pool
                .submit(async move {
                    let student_id = student.id();
                    if let Err(e) = orchestrator.kickoff(student, upload_date, mincode).await {
                        tracing::error!(student_id = %student_id, error = %e, "Saga kick-off failed");
                    }
                })
                .await?;
            queued += 1;
        }

        Ok(IngestReport {
            fileset_id: change.fileset.id,
            file_type: change.file_type,
            created: change.created,
            superseded: change.superseded,
            records,
            queued,
        })
    }
}

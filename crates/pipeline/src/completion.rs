//! Fileset completion monitor.
//!
//! A fileset's per-file and aggregate statuses are derived from how many of
//! its students still lack a terminal saga. When the aggregate reaches
//! `COMPLETED` the fileset is finalized: cross-file checks run over the
//! records as read, and the status flip and the error-student flags are
//! written together, guarded on the fileset not having changed since. The
//! periodic pass and the saga-driven check may overlap safely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gdc_core::fileset::{FileType, FilesetStatus};
use gdc_core::finalize::{self, FinalizeReport};
use gdc_core::store::Store;
use gdc_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Status saves attempted per check before leaving it to the next pass.
const MAX_SAVE_ATTEMPTS: u32 = 3;

enum Settlement {
    Done(Option<FinalizeReport>),
    /// Another writer updated the fileset after it was read.
    Raced,
}

pub struct FilesetFinalizer {
    store: Arc<dyn Store>,
}

impl FilesetFinalizer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Re-derive the statuses of a LOADED fileset. Returns the finalize
    /// report when this check completed it.
    ///
    /// A save that loses to a concurrent writer is retried on a fresh read,
    /// so the last saga to settle always sees its own result.
    pub async fn check_fileset(&self, fileset_id: DbId) -> Result<Option<FinalizeReport>, PipelineError> {
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            match self.settle(fileset_id).await? {
                Settlement::Done(report) => return Ok(report),
                Settlement::Raced => {
                    tracing::debug!(fileset_id = %fileset_id, attempt, "Fileset changed under completion check");
                }
            }
        }
        Ok(None)
    }

    async fn settle(&self, fileset_id: DbId) -> Result<Settlement, PipelineError> {
        let Some(mut fileset) = self.store.find_fileset(fileset_id).await? else {
            return Ok(Settlement::Done(None));
        };
        if fileset.status != FilesetStatus::Loaded {
            return Ok(Settlement::Done(None));
        }

        let mut unsettled = HashMap::new();
        for file_type in FileType::ALL {
            if fileset.slot(file_type).status.is_loaded() {
                let pending = self.store.unsettled_students(fileset_id, file_type).await?;
                unsettled.insert(file_type, pending);
            }
        }

        let before = fileset.clone();
        let status = fileset.apply_settlement(|t| unsettled.get(&t).copied().unwrap_or(0));
        if fileset == before {
            return Ok(Settlement::Done(None));
        }

        if status != FilesetStatus::Completed {
            return Ok(match self.store.save_fileset_status(&fileset).await? {
                true => Settlement::Done(None),
                false => Settlement::Raced,
            });
        }

        // The report is built from records read after `fileset`; the guarded
        // write refuses it if an ingest landed in between.
        let students = self.store.list_students(fileset_id, None).await?;
        let report = finalize::finalize(fileset_id, &students);
        if !self.store.complete_fileset(&fileset, &report.flags).await? {
            return Ok(Settlement::Raced);
        }

        tracing::info!(
            fileset_id = %fileset_id,
            students = report.overall.students,
            errored = report.overall.errored,
            flags = report.flags.len(),
            "Fileset completed",
        );
        Ok(Settlement::Done(Some(report)))
    }

    /// One pass over every LOADED fileset. Returns how many completed.
    pub async fn check_loaded(&self) -> Result<usize, PipelineError> {
        let mut completed = 0;
        for fileset in self.store.list_filesets_by_status(FilesetStatus::Loaded).await? {
            match self.check_fileset(fileset.id).await {
                Ok(Some(_)) => completed += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(fileset_id = %fileset.id, error = %e, "Completion check failed");
                }
            }
        }
        Ok(completed)
    }

    /// Run the completion monitor until `cancel` is triggered.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "Completion monitor started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Completion monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.check_loaded().await {
                        Ok(0) => tracing::debug!("Completion monitor: nothing completed"),
                        Ok(completed) => tracing::info!(completed, "Completion monitor: filesets completed"),
                        Err(e) => tracing::error!(error = %e, "Completion monitor: pass failed"),
                    }
                }
            }
        }
    }
}

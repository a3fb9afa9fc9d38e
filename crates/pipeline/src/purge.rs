//! Periodic removal of abandoned filesets.
//!
//! A fileset still LOADED after the configured TTL was never completed, and
//! one SUPERSEDED for longer than the TTL has been replaced by a newer
//! submission. Either is deleted with its students, sagas and flags.
//! Terminal sagas left behind by replaced records go after the same TTL.
//! COMPLETED filesets are kept. Runs on a fixed interval using
//! `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gdc_core::store::Store;
use tokio_util::sync::CancellationToken;

/// Run the stale-fileset purge loop until `cancel` is triggered.
pub async fn run(store: Arc<dyn Store>, ttl: chrono::Duration, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        ttl_hours = ttl.num_hours(),
        interval_secs = interval.as_secs(),
        "Stale fileset purge started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale fileset purge stopping");
                break;
            }
            _ = ticker.tick() => {
                let cutoff = Utc::now() - ttl;
                match store.purge_stale_filesets(cutoff).await {
                    Ok(0) => tracing::debug!("Stale fileset purge: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Stale fileset purge: removed filesets"),
                    Err(e) => tracing::error!(error = %e, "Stale fileset purge failed"),
                }
                match store.purge_orphaned_sagas(cutoff).await {
                    Ok(0) => {}
                    Ok(deleted) => tracing::info!(deleted, "Stale fileset purge: removed orphaned sagas"),
                    Err(e) => tracing::error!(error = %e, "Orphaned saga purge failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use gdc_core::fileset::{FileType, FilesetKey, FilesetOwner, FilesetStatus};
    use gdc_core::reconcile::ParsedUpload;
    use gdc_core::saga::{EventOutcome, Saga, SagaState, ValidationPayload};
    use gdc_core::store::{FilesetStore, SagaStore};
    use gdc_core::student::{AnyStudent, FieldMap};
    use gdc_core::types::new_id;

    use super::*;
    use crate::memory::InMemoryStore;

    fn key() -> FilesetKey {
        FilesetKey {
            owner: FilesetOwner::District(new_id()),
            reporting_period_id: new_id(),
        }
    }

    fn course_upload() -> ParsedUpload {
        ParsedUpload {
            file_type: FileType::Course,
            file_name: "039.crs".into(),
            uploaded_at: Utc::now(),
            students: vec![AnyStudent::from_fields(FileType::Course, &FieldMap::new())],
        }
    }

    /// Run the loop briefly with the cutoff in the future.
    async fn purge_everything_idle(store: Arc<InMemoryStore>) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            store,
            chrono::Duration::seconds(-5),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn purges_loaded_filesets_past_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let change = store.replace_file(key(), course_upload()).await.unwrap();

        purge_everything_idle(store.clone()).await;

        assert!(store.find_fileset(change.fileset.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purges_superseded_but_keeps_completed() {
        let store = Arc::new(InMemoryStore::new());
        let key = key();
        let first = store.replace_file(key, course_upload()).await.unwrap();
        let mut done = first.fileset.clone();
        done.status = FilesetStatus::Completed;
        assert!(store.complete_fileset(&done, &[]).await.unwrap());

        let second = store.replace_file(key, course_upload()).await.unwrap();
        assert_eq!(second.superseded, Some(first.fileset.id));
        let mut done = second.fileset.clone();
        done.status = FilesetStatus::Completed;
        assert!(store.complete_fileset(&done, &[]).await.unwrap());

        purge_everything_idle(store.clone()).await;

        assert!(store.find_fileset(first.fileset.id).await.unwrap().is_none());
        let kept = store.find_fileset(second.fileset.id).await.unwrap().unwrap();
        assert_eq!(kept.status, FilesetStatus::Completed);
    }

    #[tokio::test]
    async fn purges_terminal_sagas_of_replaced_records() {
        let store = Arc::new(InMemoryStore::new());
        let key = key();
        let first = store.replace_file(key, course_upload()).await.unwrap();
        let payload = ValidationPayload {
            student: first.students[0].clone(),
            upload_date: Utc::now().date_naive(),
            mincode: None,
        };
        let (mut saga, entry) = Saga::start(payload, Utc::now());
        assert!(store.create_saga(&saga, &entry).await.unwrap());
        saga.mark_dispatched(Utc::now());
        assert!(store.update_saga(&saga).await.unwrap());
        let (_, entries) = saga
            .advance(SagaState::ValidateStudent, EventOutcome::StudentNotFound, None, Utc::now())
            .unwrap();
        assert!(store.record_transition(&saga, &entries, None).await.unwrap());

        // The replacement record has no saga yet; the old one is orphaned.
        store.replace_file(key, course_upload()).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.purge_orphaned_sagas(cutoff).await.unwrap(), 1);
        assert!(store.find_saga(saga.id).await.unwrap().is_none());
        assert!(store.event_states(saga.id).await.unwrap().is_empty());
        assert!(store.find_fileset(first.fileset.id).await.unwrap().is_some());
    }
}

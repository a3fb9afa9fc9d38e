//! Saga orchestrator for per-student validation.
//!
//! Kick-off persists the saga and its first log entry, marks it
//! IN_PROGRESS and publishes the validate request. Replies are applied
//! through the transition table: replays of an already-logged outcome are
//! dropped, out-of-order outcomes are rejected, and every accepted step is
//! written together with its log entries in one store call. A publish that
//! still fails after the retry policy marks the saga ERROR.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use gdc_core::retry::{with_retry, RetryPolicy};
use gdc_core::saga::{
    EventOutcome, Saga, SagaRejection, SagaStatus, ValidationPayload, ValidationResult, VALIDATION_SAGA,
};
use gdc_core::store::{Store, StoreError};
use gdc_core::student::AnyStudent;
use gdc_core::types::{DbId, Timestamp};
use gdc_events::{topics, ChannelError, Event, MessageChannel};

use crate::completion::FilesetFinalizer;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickoffOutcome {
    /// Saga created and its validate request published.
    Started(DbId),
    /// The student already has a saga; nothing was done.
    AlreadyStarted,
    /// Saga created but publishing gave up; the saga is ERROR.
    Failed(DbId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Advanced(SagaStatus),
    /// Already applied; ignored.
    Duplicate,
    Rejected(SagaRejection),
    UnknownSaga,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub republished: usize,
    pub failed: usize,
}

enum Dispatch {
    Published,
    /// Another writer moved the saga first.
    Stale,
    Failed,
}

pub struct SagaOrchestrator {
    store: Arc<dyn Store>,
    channel: Arc<dyn MessageChannel>,
    retry: RetryPolicy,
    finalizer: Arc<FilesetFinalizer>,
}

impl SagaOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn MessageChannel>,
        retry: RetryPolicy,
        finalizer: Arc<FilesetFinalizer>,
    ) -> Self {
        Self {
            store,
            channel,
            retry,
            finalizer,
        }
    }

    /// Start the validation saga for one student record. At most one saga
    /// is ever started per record; re-validating is an explicit
    /// [`retry_saga`](Self::retry_saga).
    pub async fn kickoff(
        &self,
        student: AnyStudent,
        upload_date: NaiveDate,
        mincode: Option<String>,
    ) -> Result<KickoffOutcome, PipelineError> {
        let student_id = student.id();
        if self.store.saga_exists(student_id, VALIDATION_SAGA).await? {
            tracing::debug!(student_id = %student_id, "Saga already exists, skipping kick-off");
            return Ok(KickoffOutcome::AlreadyStarted);
        }

        let payload = ValidationPayload {
            student,
            upload_date,
            mincode,
        };
        let (mut saga, entry) = Saga::start(payload, Utc::now());
        match self.store.create_saga(&saga, &entry).await {
            Ok(true) => {}
            Ok(false) | Err(StoreError::Conflict(_)) => return Ok(KickoffOutcome::AlreadyStarted),
            Err(e) => return Err(e.into()),
        }
        tracing::info!(
            saga_id = %saga.id,
            student_id = %student_id,
            file_type = %saga.file_type.as_str(),
            "Validation saga started",
        );

        match self.dispatch(&mut saga).await? {
            Dispatch::Failed => Ok(KickoffOutcome::Failed(saga.id)),
            Dispatch::Published | Dispatch::Stale => Ok(KickoffOutcome::Started(saga.id)),
        }
    }

    /// Apply an outcome event from the validation service.
    pub async fn handle_reply(&self, event: Event) -> Result<ReplyOutcome, PipelineError> {
        let Some(mut saga) = self.store.find_saga(event.saga_id).await? else {
            tracing::warn!(saga_id = %event.saga_id, "Reply for unknown saga");
            return Ok(ReplyOutcome::UnknownSaga);
        };

        if self.is_replay(&saga, &event).await? {
            tracing::debug!(
                saga_id = %saga.id,
                outcome = %event.event_outcome.as_str(),
                "Replayed saga event ignored",
            );
            return Ok(ReplyOutcome::Duplicate);
        }

        let (issues, detail) = match event.event_outcome {
            EventOutcome::ValidationSuccessNoErrors | EventOutcome::ValidationSuccessWithErrors => {
                let result: ValidationResult = serde_json::from_value(event.payload.clone())?;
                (Some(result.issues), None)
            }
            _ => (
                None,
                event
                    .payload
                    .get("reason")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            ),
        };

        let (transition, entries) =
            match saga.advance(event.event_type, event.event_outcome, detail, Utc::now()) {
                Ok(accepted) => accepted,
                Err(rejection) => {
                    tracing::warn!(saga_id = %saga.id, reason = %rejection, "Saga event rejected");
                    return Ok(ReplyOutcome::Rejected(rejection));
                }
            };

        // Status is re-derived from the issues; the record is always the saga's own.
        let result = issues
            .filter(|_| transition.update_student)
            .map(|issues| ValidationResult::new(saga.student_id, issues));

        if !self.store.record_transition(&saga, &entries, result.as_ref()).await? {
            tracing::debug!(saga_id = %saga.id, "Concurrent writer logged this step first");
            return Ok(ReplyOutcome::Duplicate);
        }
        tracing::info!(
            saga_id = %saga.id,
            status = %saga.status.as_str(),
            outcome = %event.event_outcome.as_str(),
            "Saga advanced",
        );

        if saga.status.is_terminal() {
            self.check_completion(saga.fileset_id).await;
        }
        Ok(ReplyOutcome::Advanced(saga.status))
    }

    /// Operator retry of an ERROR saga. Returns whether the validate request
    /// went out; when it did not, the saga is ERROR again.
    pub async fn retry_saga(&self, saga_id: DbId) -> Result<bool, PipelineError> {
        let mut saga = self.store.find_saga(saga_id).await?.ok_or(PipelineError::NotFound {
            entity: "saga",
            id: saga_id,
        })?;
        let entry = saga.prepare_retry(Utc::now())?;
        if !self.store.record_transition(&saga, &[entry], None).await? {
            return Err(StoreError::Conflict(format!("saga {saga_id} changed during retry")).into());
        }
        tracing::info!(saga_id = %saga_id, retry_count = saga.retry_count, "Saga retry requested");

        match self.publish_request(&saga).await {
            Ok(_) => Ok(true),
            Err(e) => {
                self.fail(&mut saga, &e).await?;
                Ok(false)
            }
        }
    }

    /// Republish sagas that have not moved since `older_than`; those that
    /// already used `max_republishes` are marked ERROR instead.
    pub async fn sweep_stalled(
        &self,
        older_than: Timestamp,
        limit: i64,
        max_republishes: i32,
    ) -> Result<SweepReport, PipelineError> {
        let mut report = SweepReport::default();
        for mut saga in self.store.find_stalled_sagas(older_than, limit).await? {
            if saga.retry_count >= max_republishes {
                saga.mark_error(format!("no reply after {} republishes", saga.retry_count), Utc::now());
                if self.store.update_saga(&saga).await? {
                    tracing::warn!(saga_id = %saga.id, "Stalled saga marked ERROR");
                    report.failed += 1;
                    self.check_completion(saga.fileset_id).await;
                }
                continue;
            }

            saga.record_republish(Utc::now());
            match self.dispatch(&mut saga).await {
                Ok(Dispatch::Published) => report.republished += 1,
                Ok(Dispatch::Failed) => report.failed += 1,
                Ok(Dispatch::Stale) => {}
                Err(e) => tracing::error!(saga_id = %saga.id, error = %e, "Stalled saga republish failed"),
            }
        }
        Ok(report)
    }

    async fn is_replay(&self, saga: &Saga, event: &Event) -> Result<bool, PipelineError> {
        let (event_type, outcome) = (event.event_type, event.event_outcome);
        if self
            .store
            .event_state_exists(saga.id, event_type, outcome, saga.step)
            .await?
        {
            return Ok(true);
        }
        // A completed saga logs the outcome one step before its completion entry.
        if saga.status == SagaStatus::Completed {
            return Ok(self
                .store
                .event_state_exists(saga.id, event_type, outcome, saga.step - 1)
                .await?);
        }
        Ok(false)
    }

    /// Persist IN_PROGRESS, then publish the validate request.
    async fn dispatch(&self, saga: &mut Saga) -> Result<Dispatch, PipelineError> {
        saga.mark_dispatched(Utc::now());
        if !self.store.update_saga(saga).await? {
            tracing::debug!(saga_id = %saga.id, "Saga moved on before dispatch");
            return Ok(Dispatch::Stale);
        }
        match self.publish_request(saga).await {
            Ok(attempts) => {
                tracing::debug!(saga_id = %saga.id, attempts, "Validate request published");
                Ok(Dispatch::Published)
            }
            Err(e) => {
                self.fail(saga, &e).await?;
                Ok(Dispatch::Failed)
            }
        }
    }

    async fn publish_request(&self, saga: &Saga) -> Result<u32, PipelineError> {
        let bytes = Event::validate_request(saga)?.to_bytes()?;
        let channel = self.channel.as_ref();
        let attempted = with_retry(&self.retry, "publish_validate_request", ChannelError::is_transient, || {
            channel.publish(topics::VALIDATE_STUDENT, bytes.clone())
        })
        .await?;
        Ok(attempted.attempts)
    }

    async fn fail(&self, saga: &mut Saga, error: &PipelineError) -> Result<(), PipelineError> {
        tracing::error!(saga_id = %saga.id, error = %error, "Saga publish failed, marking ERROR");
        saga.mark_error(error.to_string(), Utc::now());
        if self.store.update_saga(saga).await? {
            self.check_completion(saga.fileset_id).await;
        } else {
            tracing::debug!(saga_id = %saga.id, "Saga moved on before it could be marked ERROR");
        }
        Ok(())
    }

    async fn check_completion(&self, fileset_id: DbId) {
        if let Err(e) = self.finalizer.check_fileset(fileset_id).await {
            tracing::error!(fileset_id = %fileset_id, error = %e, "Completion check failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use gdc_core::fileset::{FileType, FilesetKey, FilesetOwner};
    use gdc_core::reconcile::ParsedUpload;
    use gdc_core::saga::SagaState;
    use gdc_core::store::{FilesetStore, SagaStore, StudentStore};
    use gdc_core::student::{fields, FieldMap, StudentStatus};
    use gdc_core::types::new_id;
    use gdc_core::validation::{FieldCode, IssueCode, RuleId, ValidationIssue};
    use gdc_events::EventBus;

    use super::*;
    use crate::memory::InMemoryStore;

    /// Fails the first `failures` publishes with a 503, then accepts.
    #[derive(Default)]
    struct FlakyChannel {
        failures: AtomicU32,
        published: AtomicU32,
    }

    impl FlakyChannel {
        fn failing(n: u32) -> Self {
            Self {
                failures: AtomicU32::new(n),
                published: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageChannel for FlakyChannel {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), ChannelError> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(ChannelError::HttpStatus(503));
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
        }
    }

    async fn student(store: &InMemoryStore) -> AnyStudent {
        let mut map = FieldMap::new();
        map.insert(fields::PEN.into(), "120164447".into());
        let key = FilesetKey {
            owner: FilesetOwner::School(new_id()),
            reporting_period_id: new_id(),
        };
        let upload = ParsedUpload {
            file_type: FileType::Demographic,
            file_name: "03939001.dem".into(),
            uploaded_at: Utc::now(),
            students: vec![AnyStudent::from_fields(FileType::Demographic, &map)],
        };
        let mut change = store.replace_file(key, upload).await.unwrap();
        change.students.remove(0)
    }

    fn orchestrator(store: Arc<InMemoryStore>, channel: Arc<dyn MessageChannel>) -> SagaOrchestrator {
        let finalizer = Arc::new(FilesetFinalizer::new(store.clone()));
        SagaOrchestrator::new(store, channel, fast(), finalizer)
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[tokio::test]
    async fn kickoff_publishes_once_per_student() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orch = orchestrator(store.clone(), bus);
        let s = student(&store).await;

        let first = orch.kickoff(s.clone(), today(), None).await.unwrap();
        let saga_id = assert_matches!(first, KickoffOutcome::Started(id) => id);
        assert_eq!(orch.kickoff(s, today(), None).await.unwrap(), KickoffOutcome::AlreadyStarted);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, topics::VALIDATE_STUDENT);
        let event = Event::from_bytes(&message.payload).unwrap();
        assert_eq!(event.saga_id, saga_id);
        assert!(rx.try_recv().is_err());

        let saga = store.find_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::InProgress);
        assert_eq!(saga.state, SagaState::ValidateStudent);
    }

    #[tokio::test]
    async fn success_reply_completes_and_replay_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone(), Arc::new(EventBus::default()));
        let s = student(&store).await;
        let saga_id = assert_matches!(
            orch.kickoff(s.clone(), today(), None).await.unwrap(),
            KickoffOutcome::Started(id) => id
        );

        let issue = ValidationIssue::new(RuleId::D05, FieldCode::LegalSurname, IssueCode::StudentSurnameBlank);
        let result = ValidationResult::new(s.id(), vec![issue]);
        let reply = Event::reply(
            saga_id,
            EventOutcome::ValidationSuccessWithErrors,
            serde_json::to_value(&result).unwrap(),
        );

        assert_eq!(
            orch.handle_reply(reply.clone()).await.unwrap(),
            ReplyOutcome::Advanced(SagaStatus::Completed)
        );
        assert_eq!(orch.handle_reply(reply).await.unwrap(), ReplyOutcome::Duplicate);

        let stored = store.find_student(s.id()).await.unwrap().unwrap();
        assert_eq!(stored.header().status, StudentStatus::Error);
        assert_eq!(stored.header().issues.len(), 1);
        assert_eq!(store.event_states(saga_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn conflicting_outcome_after_completion_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone(), Arc::new(EventBus::default()));
        let s = student(&store).await;
        let saga_id = assert_matches!(
            orch.kickoff(s, today(), None).await.unwrap(),
            KickoffOutcome::Started(id) => id
        );

        let not_found = Event::reply(saga_id, EventOutcome::StudentNotFound, serde_json::Value::Null);
        orch.handle_reply(not_found).await.unwrap();
        let failed = Event::reply(saga_id, EventOutcome::ValidationFailed, serde_json::json!({"reason": "late"}));
        assert_eq!(
            orch.handle_reply(failed).await.unwrap(),
            ReplyOutcome::Rejected(SagaRejection::Terminal(SagaStatus::Completed))
        );
    }

    #[tokio::test]
    async fn unknown_saga_reply() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store, Arc::new(EventBus::default()));
        let reply = Event::reply(new_id(), EventOutcome::StudentNotFound, serde_json::Value::Null);
        assert_eq!(orch.handle_reply(reply).await.unwrap(), ReplyOutcome::UnknownSaga);
    }

    #[tokio::test]
    async fn publish_failure_marks_error_and_retry_recovers() {
        let store = Arc::new(InMemoryStore::new());
        let channel = Arc::new(FlakyChannel::failing(2));
        let orch = orchestrator(store.clone(), channel.clone());
        let s = student(&store).await;

        let saga_id = assert_matches!(
            orch.kickoff(s, today(), None).await.unwrap(),
            KickoffOutcome::Failed(id) => id
        );
        let saga = store.find_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Error);
        assert!(saga.last_error.is_some());

        assert!(orch.retry_saga(saga_id).await.unwrap());
        let saga = store.find_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::InProgress);
        assert_eq!(saga.retry_count, 1);
        assert_eq!(channel.published.load(Ordering::SeqCst), 1);

        assert_matches!(
            orch.retry_saga(saga_id).await,
            Err(PipelineError::Saga(SagaRejection::NotRetryable(SagaStatus::InProgress)))
        );
    }

    #[tokio::test]
    async fn repeated_failure_after_retry_is_not_a_replay() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone(), Arc::new(EventBus::default()));
        let s = student(&store).await;
        let saga_id = assert_matches!(
            orch.kickoff(s, today(), None).await.unwrap(),
            KickoffOutcome::Started(id) => id
        );

        let failed = || Event::reply(saga_id, EventOutcome::ValidationFailed, serde_json::json!({"reason": "registry down"}));
        assert_eq!(
            orch.handle_reply(failed()).await.unwrap(),
            ReplyOutcome::Advanced(SagaStatus::Error)
        );
        assert_eq!(orch.handle_reply(failed()).await.unwrap(), ReplyOutcome::Duplicate);

        orch.retry_saga(saga_id).await.unwrap();
        assert_eq!(
            orch.handle_reply(failed()).await.unwrap(),
            ReplyOutcome::Advanced(SagaStatus::Error)
        );
        let saga = store.find_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.last_error.as_deref(), Some("registry down"));
    }

    #[tokio::test]
    async fn sweep_republishes_then_gives_up() {
        let store = Arc::new(InMemoryStore::new());
        let channel = Arc::new(FlakyChannel::default());
        let orch = orchestrator(store.clone(), channel.clone());
        let s = student(&store).await;
        let saga_id = assert_matches!(
            orch.kickoff(s, today(), None).await.unwrap(),
            KickoffOutcome::Started(id) => id
        );

        let later = || Utc::now() + chrono::Duration::seconds(1);
        let report = orch.sweep_stalled(later(), 10, 1).await.unwrap();
        assert_eq!(report, SweepReport { republished: 1, failed: 0 });
        assert_eq!(channel.published.load(Ordering::SeqCst), 2);

        let report = orch.sweep_stalled(later(), 10, 1).await.unwrap();
        assert_eq!(report, SweepReport { republished: 0, failed: 1 });
        let saga = store.find_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Error);

        let report = orch.sweep_stalled(later(), 10, 1).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }
}

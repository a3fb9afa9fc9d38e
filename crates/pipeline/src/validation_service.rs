//! Answers validate requests: load the run context, evaluate the rules for
//! the record's file type, reply with the outcome.

use std::sync::Arc;

use gdc_core::retry::{with_retry, RetryPolicy};
use gdc_core::saga::{EventOutcome, ValidationPayload, ValidationResult};
use gdc_core::store::Store;
use gdc_core::validation::RuleEngines;
use gdc_events::{topics, ChannelError, Event, MessageChannel};
use serde_json::{json, Value};

use crate::context_loader::ContextLoader;
use crate::error::PipelineError;

pub struct ValidationService {
    store: Arc<dyn Store>,
    loader: ContextLoader,
    engines: RuleEngines,
    channel: Arc<dyn MessageChannel>,
    retry: RetryPolicy,
}

impl ValidationService {
    pub fn new(
        store: Arc<dyn Store>,
        loader: ContextLoader,
        channel: Arc<dyn MessageChannel>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            loader,
            engines: RuleEngines::standard(),
            channel,
            retry,
        }
    }

    /// Handle one validate request and publish the reply on
    /// [`topics::SAGA_REPLY`].
    pub async fn handle_request(&self, event: Event) -> Result<EventOutcome, PipelineError> {
        let payload: ValidationPayload = serde_json::from_value(event.payload)?;
        let (outcome, body) = self.evaluate(&payload).await?;

        let bytes = Event::reply(event.saga_id, outcome, body).to_bytes()?;
        let channel = self.channel.as_ref();
        with_retry(&self.retry, "publish_saga_reply", ChannelError::is_transient, || {
            channel.publish(topics::SAGA_REPLY, bytes.clone())
        })
        .await?;

        tracing::debug!(saga_id = %event.saga_id, outcome = %outcome.as_str(), "Validation reply published");
        Ok(outcome)
    }

    /// Outcome and reply payload for one record.
    pub async fn evaluate(&self, payload: &ValidationPayload) -> Result<(EventOutcome, Value), PipelineError> {
        let student_id = payload.student.id();
        // The record is gone when its file was replaced after kick-off.
        let Some(student) = self.store.find_student(student_id).await? else {
            return Ok((EventOutcome::StudentNotFound, Value::Null));
        };

        let ctx = match self.loader.load(payload).await {
            Ok(ctx) => ctx,
            Err(PipelineError::Lookup(e)) => {
                tracing::warn!(student_id = %student_id, error = %e, "Registry lookups failed");
                return Ok((EventOutcome::ValidationFailed, json!({ "reason": e.to_string() })));
            }
            Err(e) => return Err(e),
        };

        let issues = self.engines.validate(&student, &ctx);
        let outcome = EventOutcome::for_issues(&issues);
        let result = ValidationResult::new(student_id, issues);
        Ok((outcome, serde_json::to_value(&result)?))
    }
}

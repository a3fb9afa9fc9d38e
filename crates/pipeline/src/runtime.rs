//! Routes bus traffic to the saga services.
//!
//! [`MessageRuntime`] subscribes to the [`EventBus`](gdc_events::EventBus)
//! broadcast channel: validate requests go to the [`ValidationService`],
//! replies to the [`SagaOrchestrator`]. Each message is handled on its own
//! task so a slow registry lookup never blocks reply processing.

use std::sync::Arc;

use gdc_events::{topics, Event, Message};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::SagaOrchestrator;
use crate::validation_service::ValidationService;

pub struct MessageRuntime {
    orchestrator: Arc<SagaOrchestrator>,
    validation: Arc<ValidationService>,
}

impl MessageRuntime {
    pub fn new(orchestrator: Arc<SagaOrchestrator>, validation: Arc<ValidationService>) -> Self {
        Self {
            orchestrator,
            validation,
        }
    }

    /// Run the routing loop until `cancel` fires or the bus is dropped.
    ///
    /// Messages lost to lag are not replayed here; the stalled-saga sweep
    /// republishes their sagas.
    pub async fn run(&self, mut receiver: broadcast::Receiver<Message>, cancel: CancellationToken) {
        tracing::info!("Message runtime started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Message runtime shutting down");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(message) => self.route(message),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Message runtime lagged, some messages were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, message runtime shutting down");
                        break;
                    }
                },
            }
        }
    }

    fn route(&self, message: Message) {
        let event = match Event::from_bytes(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Dropping malformed message");
                return;
            }
        };

        match message.topic.as_str() {
            topics::VALIDATE_STUDENT => {
                let validation = Arc::clone(&self.validation);
                tokio::spawn(async move {
                    let saga_id = event.saga_id;
                    if let Err(e) = validation.handle_request(event).await {
                        tracing::error!(saga_id = %saga_id, error = %e, "Validate request failed");
                    }
                });
            }
            topics::SAGA_REPLY => {
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::spawn(async move {
                    let saga_id = event.saga_id;
                    match orchestrator.handle_reply(event).await {
                        Ok(outcome) => tracing::debug!(saga_id = %saga_id, ?outcome, "Saga reply handled"),
                        Err(e) => tracing::error!(saga_id = %saga_id, error = %e, "Saga reply failed"),
                    }
                });
            }
            other => tracing::debug!(topic = other, "Ignoring message on unrouted topic"),
        }
    }
}

//! The saga message envelope.

use gdc_core::saga::{EventOutcome, Saga, SagaState};
use gdc_core::types::DbId;
use serde::{Deserialize, Serialize};

/// Topics the pipeline publishes to and listens on.
pub mod topics {
    /// Validate requests from the orchestrator to the validation service.
    pub const VALIDATE_STUDENT: &str = "gdc.student.validate";
    /// Outcome replies from the validation service to the orchestrator.
    pub const SAGA_REPLY: &str = "gdc.saga.reply";
}

/// `{eventType, eventOutcome, sagaId, payload}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: SagaState,
    pub event_outcome: EventOutcome,
    pub saga_id: DbId,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Ask the validation service to run the rule pass for `saga`.
    pub fn validate_request(saga: &Saga) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: SagaState::ValidateStudent,
            event_outcome: EventOutcome::InitiateSuccess,
            saga_id: saga.id,
            payload: serde_json::to_value(&saga.payload)?,
        })
    }

    /// An outcome reply for the `VALIDATE_STUDENT` step.
    pub fn reply(saga_id: DbId, outcome: EventOutcome, payload: serde_json::Value) -> Self {
        Self {
            event_type: SagaState::ValidateStudent,
            event_outcome: outcome,
            saga_id,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_camel_case_with_screaming_enums() {
        let saga_id = uuid::Uuid::nil();
        let event = Event::reply(
            saga_id,
            EventOutcome::ValidationSuccessNoErrors,
            serde_json::json!({"issues": []}),
        );
        let json: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(json["eventType"], "VALIDATE_STUDENT");
        assert_eq!(json["eventOutcome"], "VALIDATION_SUCCESS_NO_ERRORS");
        assert_eq!(json["sagaId"], saga_id.to_string());
        assert!(json["payload"]["issues"].is_array());
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let raw = br#"{"eventType":"VALIDATE_STUDENT","eventOutcome":"STUDENT_NOT_FOUND","sagaId":"00000000-0000-0000-0000-000000000000"}"#;
        let event = Event::from_bytes(raw).unwrap();
        assert_eq!(event.event_outcome, EventOutcome::StudentNotFound);
        assert!(event.payload.is_null());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Event::from_bytes(b"not json").is_err());
        assert!(Event::from_bytes(br#"{"eventType":"BOGUS"}"#).is_err());
    }
}

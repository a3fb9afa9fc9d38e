//! Per-student validation saga: statuses, steps, and the transition table.
//!
//! A saga moves `INITIATED → IN_PROGRESS → COMPLETED | ERROR`. Outcome
//! events are checked against a static table keyed by the saga's current
//! step; anything else is rejected, so transitions stay strictly monotonic.
//! Every accepted outcome appends an entry to the saga's event-state log,
//! which is what the replay guard consults.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fileset::FileType;
use crate::student::{AnyStudent, StudentStatus};
use crate::types::{new_id, DbId, Timestamp};
use crate::validation::ValidationIssue;

/// Name of the one saga this pipeline runs per student record.
pub const VALIDATION_SAGA: &str = "GDC_STUDENT_VALIDATION_SAGA";

// ---------------------------------------------------------------------------
// Status / step / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Initiated,
    InProgress,
    Completed,
    Error,
}

impl SagaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(Self::Initiated),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Saga step; doubles as the event type on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    Initiated,
    ValidateStudent,
    MarkSagaComplete,
}

impl SagaState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::ValidateStudent => "VALIDATE_STUDENT",
            Self::MarkSagaComplete => "MARK_SAGA_COMPLETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(Self::Initiated),
            "VALIDATE_STUDENT" => Some(Self::ValidateStudent),
            "MARK_SAGA_COMPLETE" => Some(Self::MarkSagaComplete),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    InitiateSuccess,
    /// Operator asked for an ERROR saga to be replayed.
    RetryRequested,
    ValidationSuccessNoErrors,
    ValidationSuccessWithErrors,
    /// Registry lookups kept failing; the record could not be validated.
    ValidationFailed,
    /// The record was replaced by a newer upload while the saga ran.
    StudentNotFound,
    SagaCompleted,
}

impl EventOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitiateSuccess => "INITIATE_SUCCESS",
            Self::RetryRequested => "RETRY_REQUESTED",
            Self::ValidationSuccessNoErrors => "VALIDATION_SUCCESS_NO_ERRORS",
            Self::ValidationSuccessWithErrors => "VALIDATION_SUCCESS_WITH_ERRORS",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::StudentNotFound => "STUDENT_NOT_FOUND",
            Self::SagaCompleted => "SAGA_COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATE_SUCCESS" => Some(Self::InitiateSuccess),
            "RETRY_REQUESTED" => Some(Self::RetryRequested),
            "VALIDATION_SUCCESS_NO_ERRORS" => Some(Self::ValidationSuccessNoErrors),
            "VALIDATION_SUCCESS_WITH_ERRORS" => Some(Self::ValidationSuccessWithErrors),
            "VALIDATION_FAILED" => Some(Self::ValidationFailed),
            "STUDENT_NOT_FOUND" => Some(Self::StudentNotFound),
            "SAGA_COMPLETED" => Some(Self::SagaCompleted),
            _ => None,
        }
    }

    /// Outcome the validation service reports for a finished rule pass.
    pub fn for_issues(issues: &[ValidationIssue]) -> Self {
        match StudentStatus::after_validation(issues) {
            StudentStatus::Error => Self::ValidationSuccessWithErrors,
            _ => Self::ValidationSuccessNoErrors,
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// What an accepted outcome does to the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next_state: SagaState,
    pub status: SagaStatus,
    /// Write the validation result onto the student record.
    pub update_student: bool,
}

/// Allowed `(current step, event type, outcome)` combinations.
pub fn transition(current: SagaState, event_type: SagaState, outcome: EventOutcome) -> Option<Transition> {
    use EventOutcome::*;
    use SagaState::*;

    match (current, event_type, outcome) {
        (ValidateStudent, ValidateStudent, ValidationSuccessNoErrors | ValidationSuccessWithErrors) => {
            Some(Transition {
                next_state: MarkSagaComplete,
                status: SagaStatus::Completed,
                update_student: true,
            })
        }
        (ValidateStudent, ValidateStudent, StudentNotFound) => Some(Transition {
            next_state: MarkSagaComplete,
            status: SagaStatus::Completed,
            update_student: false,
        }),
        (ValidateStudent, ValidateStudent, ValidationFailed) => Some(Transition {
            next_state: ValidateStudent,
            status: SagaStatus::Error,
            update_student: false,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SagaRejection {
    #[error("saga is already {0}")]
    Terminal(SagaStatus),

    #[error("{event_type}/{outcome} is not valid in step {current}")]
    OutOfOrder {
        current: SagaState,
        event_type: SagaState,
        outcome: EventOutcome,
    },

    #[error("only ERROR sagas can be retried (saga is {0})")]
    NotRetryable(SagaStatus),
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Snapshot stored with the saga and replayed on every (re)publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPayload {
    pub student: AnyStudent,
    pub upload_date: NaiveDate,
    pub mincode: Option<String>,
}

/// What the validation service sends back with a success outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub student_id: DbId,
    pub status: StudentStatus,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new(student_id: DbId, issues: Vec<ValidationIssue>) -> Self {
        Self {
            student_id,
            status: StudentStatus::after_validation(&issues),
            issues,
        }
    }
}

// ---------------------------------------------------------------------------
// Saga + log
// ---------------------------------------------------------------------------

/// One append-only entry in a saga's event-state log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaEventState {
    pub id: DbId,
    pub saga_id: DbId,
    pub step_number: i32,
    pub event_type: SagaState,
    pub outcome: EventOutcome,
    pub detail: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub id: DbId,
    pub saga_name: String,
    pub student_id: DbId,
    pub fileset_id: DbId,
    pub file_type: FileType,
    pub pen: Option<String>,
    pub status: SagaStatus,
    pub state: SagaState,
    pub payload: ValidationPayload,
    pub retry_count: i32,
    /// Step number of the latest log entry.
    pub step: i32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Saga {
    /// A new validation saga plus its first log entry.
    pub fn start(payload: ValidationPayload, now: Timestamp) -> (Self, SagaEventState) {
        let header = payload.student.header();
        let (student_id, fileset_id, pen) = (header.id, header.fileset_id, header.pen.clone());
        let saga = Self {
            id: new_id(),
            saga_name: VALIDATION_SAGA.to_string(),
            student_id,
            fileset_id,
            file_type: payload.student.file_type(),
            pen,
            status: SagaStatus::Initiated,
            state: SagaState::Initiated,
            payload,
            retry_count: 0,
            step: 1,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let entry = saga.entry(1, SagaState::Initiated, EventOutcome::InitiateSuccess, None, now);
        (saga, entry)
    }

    fn entry(
        &self,
        step_number: i32,
        event_type: SagaState,
        outcome: EventOutcome,
        detail: Option<String>,
        now: Timestamp,
    ) -> SagaEventState {
        SagaEventState {
            id: new_id(),
            saga_id: self.id,
            step_number,
            event_type,
            outcome,
            detail,
            created_at: now,
        }
    }

    fn push_entry(
        &mut self,
        event_type: SagaState,
        outcome: EventOutcome,
        detail: Option<String>,
        now: Timestamp,
    ) -> SagaEventState {
        self.step += 1;
        self.entry(self.step, event_type, outcome, detail, now)
    }

    /// The validate request went out; the saga now waits for an outcome.
    /// Republishing an in-flight saga leaves it where it is.
    pub fn mark_dispatched(&mut self, now: Timestamp) {
        if self.status == SagaStatus::Initiated {
            self.status = SagaStatus::InProgress;
            self.state = SagaState::ValidateStudent;
        }
        self.updated_at = now;
    }

    /// Apply an outcome event. Returns the transition taken and the log
    /// entries to append.
    pub fn advance(
        &mut self,
        event_type: SagaState,
        outcome: EventOutcome,
        detail: Option<String>,
        now: Timestamp,
    ) -> Result<(Transition, Vec<SagaEventState>), SagaRejection> {
        if self.status.is_terminal() {
            return Err(SagaRejection::Terminal(self.status));
        }
        let t = transition(self.state, event_type, outcome).ok_or(SagaRejection::OutOfOrder {
            current: self.state,
            event_type,
            outcome,
        })?;

        let mut entries = vec![self.push_entry(event_type, outcome, detail.clone(), now)];
        self.state = t.next_state;
        self.status = t.status;
        self.updated_at = now;
        match t.status {
            SagaStatus::Completed => {
                entries.push(self.push_entry(
                    SagaState::MarkSagaComplete,
                    EventOutcome::SagaCompleted,
                    None,
                    now,
                ));
            }
            SagaStatus::Error => self.last_error = detail,
            _ => {}
        }
        Ok((t, entries))
    }

    /// Give up on the saga (retry budget spent).
    pub fn mark_error(&mut self, reason: impl Into<String>, now: Timestamp) {
        self.status = SagaStatus::Error;
        self.last_error = Some(reason.into());
        self.updated_at = now;
    }

    /// Operator retry of an ERROR saga: back to waiting for a validate
    /// outcome, with a log entry so a repeated failure is not mistaken for a
    /// replay of the previous one.
    pub fn prepare_retry(&mut self, now: Timestamp) -> Result<SagaEventState, SagaRejection> {
        if self.status != SagaStatus::Error {
            return Err(SagaRejection::NotRetryable(self.status));
        }
        self.status = SagaStatus::InProgress;
        self.state = SagaState::ValidateStudent;
        self.retry_count += 1;
        self.last_error = None;
        self.updated_at = now;
        Ok(self.push_entry(SagaState::Initiated, EventOutcome::RetryRequested, None, now))
    }

    /// Stalled-saga republish bookkeeping.
    pub fn record_republish(&mut self, now: Timestamp) {
        self.retry_count += 1;
        self.updated_at = now;
    }
}

/// Replay guard: the event is a duplicate when it matches the latest entry.
pub fn is_replay(latest: Option<&SagaEventState>, event_type: SagaState, outcome: EventOutcome) -> bool {
    latest.is_some_and(|e| e.event_type == event_type && e.outcome == outcome)
}

use crate::types::DbId;

/// Why an uploaded file was rejected before anything was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnprocessableReason {
    /// A record carried a transaction code that does not belong to the file type.
    InvalidTransactionCode,
    /// The file name does not end in `.dem`, `.crs` or `.xam`.
    InvalidExtension,
    /// No reporting period covers the upload timestamp.
    NoActiveReportingPeriod,
    /// The file contained no records at all.
    Empty,
}

impl UnprocessableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTransactionCode => "INVALID_TRANSACTION_CODE",
            Self::InvalidExtension => "INVALID_FILE_EXTENSION",
            Self::NoActiveReportingPeriod => "NO_ACTIVE_REPORTING_PERIOD",
            Self::Empty => "EMPTY_FILE",
        }
    }
}

impl std::fmt::Display for UnprocessableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Structural problem with an uploaded file; the whole file is rejected.
    #[error("File unprocessable ({reason}): {detail}")]
    FileUnprocessable {
        reason: UnprocessableReason,
        detail: String,
    },

    /// File content belongs to a different school or district than the target.
    #[error("School mismatch: {0}")]
    SchoolMismatch(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Two writers raced on the same fileset key.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn unprocessable(reason: UnprocessableReason, detail: impl Into<String>) -> Self {
        Self::FileUnprocessable {
            reason,
            detail: detail.into(),
        }
    }
}

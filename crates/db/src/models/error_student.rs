//! Error fileset student entity model.

use gdc_core::fileset::FileType;
use gdc_core::finalize::{ErrorStudentFlag, FlagReason};
use gdc_core::store::StoreError;
use gdc_core::types::{DbId, Timestamp};
use gdc_core::validation::Severity;
use serde::Serialize;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `error_fileset_students` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ErrorStudentRow {
    pub id: i64,
    pub fileset_id: DbId,
    pub pen: String,
    pub reason: String,
    pub severity: String,
    pub file_type: String,
    pub created_at: Timestamp,
}

impl TryFrom<ErrorStudentRow> for ErrorStudentFlag {
    type Error = StoreError;

    fn try_from(row: ErrorStudentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            fileset_id: row.fileset_id,
            pen: row.pen,
            reason: parse_column("error_fileset_students.reason", &row.reason, FlagReason::parse)?,
            severity: parse_column("error_fileset_students.severity", &row.severity, Severity::parse)?,
            file_type: parse_column("error_fileset_students.file_type", &row.file_type, FileType::parse)?,
        })
    }
}

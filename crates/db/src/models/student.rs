//! Fileset student entity model.
//!
//! The typed record is stored whole in `record`; `file_type`, `pen` and
//! `status` are projections kept in sync by the repository so lookups and
//! settlement counts never have to look inside the JSON.

use gdc_core::fileset::FileType;
use gdc_core::store::StoreError;
use gdc_core::student::{AnyStudent, StudentStatus};
use gdc_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `fileset_students` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StudentRow {
    pub id: DbId,
    pub fileset_id: DbId,
    pub file_type: String,
    pub pen: Option<String>,
    pub status: String,
    pub record: Json<AnyStudent>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<StudentRow> for AnyStudent {
    type Error = StoreError;

    fn try_from(row: StudentRow) -> Result<Self, Self::Error> {
        let file_type = parse_column("fileset_students.file_type", &row.file_type, FileType::parse)?;
        let status = parse_column("fileset_students.status", &row.status, StudentStatus::parse)?;
        let mut student = row.record.0;
        if student.file_type() != file_type {
            return Err(StoreError::Corrupt(format!(
                "student {} is stored as {file_type} but its record is {}",
                row.id,
                student.file_type()
            )));
        }
        let header = student.header_mut();
        header.id = row.id;
        header.fileset_id = row.fileset_id;
        header.status = status;
        Ok(student)
    }
}

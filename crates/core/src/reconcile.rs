//! Fileset reconciliation: turn one uploaded file into a replacement of that
//! file's student collection inside the current fileset.
//!
//! [`parse_upload`] rejects structurally bad files before anything touches
//! storage. [`apply`] plans the write; stores call it inside their exclusive
//! write scope and persist the resulting [`FilesetChange`] in one unit.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, UnprocessableReason};
use crate::fileset::{FileType, Fileset, FilesetKey, FilesetStatus, IngestTarget};
use crate::student::{AnyStudent, FieldMap};
use crate::types::{new_id, DbId, Timestamp};

/// A validated upload, ready to be reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedUpload {
    pub file_type: FileType,
    pub file_name: String,
    pub uploaded_at: Timestamp,
    pub students: Vec<AnyStudent>,
}

/// Check and type the records of one uploaded file.
///
/// The file type comes from the extension. Every record must carry the
/// file type's transaction code and a MINCODE inside `target`.
pub fn parse_upload(
    file_name: &str,
    records: impl IntoIterator<Item = FieldMap>,
    target: &IngestTarget,
    uploaded_at: Timestamp,
) -> Result<ParsedUpload, CoreError> {
    let file_type = FileType::from_file_name(file_name)?;
    let expected_code = file_type.transaction_code();

    let mut students = Vec::new();
    for (index, fields) in records.into_iter().enumerate() {
        let line = index + 1;
        let student = AnyStudent::from_fields(file_type, &fields);
        let header = student.header();

        match header.transaction_code.as_deref() {
            Some(code) if code.eq_ignore_ascii_case(expected_code) => {}
            other => {
                return Err(CoreError::unprocessable(
                    UnprocessableReason::InvalidTransactionCode,
                    format!(
                        "record {line}: transaction code '{}' is not {expected_code}",
                        other.unwrap_or("")
                    ),
                ))
            }
        }

        let mincode = header.mincode.as_deref().unwrap_or("");
        if !target.accepts_mincode(mincode) {
            return Err(CoreError::SchoolMismatch(format!(
                "record {line}: MINCODE '{mincode}' does not belong to {}",
                target.describe()
            )));
        }

        students.push(student);
    }

    if students.is_empty() {
        return Err(CoreError::unprocessable(
            UnprocessableReason::Empty,
            format!("'{file_name}' contains no records"),
        ));
    }

    Ok(ParsedUpload {
        file_type,
        file_name: file_name.to_string(),
        uploaded_at,
        students,
    })
}

/// The write a store must perform for one ingest, all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct FilesetChange {
    /// Fileset to insert (when `created`) or update.
    pub fileset: Fileset,
    pub created: bool,
    /// COMPLETED fileset for the same key to mark SUPERSEDED.
    pub superseded: Option<DbId>,
    /// Collection to clear before inserting `students`.
    pub file_type: FileType,
    /// New records, back-referencing `fileset.id`.
    pub students: Vec<AnyStudent>,
}

/// Plan the reconcile of `upload` into the fileset for `key`.
///
/// `loaded` is the key's LOADED fileset, if any; `completed` its COMPLETED
/// one. Without a LOADED fileset a new one is created and a COMPLETED
/// predecessor is superseded.
pub fn apply(
    key: FilesetKey,
    loaded: Option<Fileset>,
    completed: Option<&Fileset>,
    upload: ParsedUpload,
    now: Timestamp,
) -> FilesetChange {
    let (mut fileset, created, superseded) = match loaded {
        Some(fileset) => (fileset, false, None),
        None => (
            Fileset::new(new_id(), key, now),
            true,
            completed.map(|f| f.id),
        ),
    };

    fileset.mark_file_loaded(upload.file_type, &upload.file_name, upload.uploaded_at);
    // Fresh records have no terminal saga yet.
    fileset.status = FilesetStatus::Loaded;
    fileset.updated_at = now;

    let students = upload
        .students
        .into_iter()
        .map(|mut s| {
            s.header_mut().fileset_id = fileset.id;
            s
        })
        .collect();

    FilesetChange {
        fileset,
        created,
        superseded,
        file_type: upload.file_type,
        students,
    }
}

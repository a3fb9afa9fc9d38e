//! Fileset entity model.

use gdc_core::fileset::{FileSlot, FileStatus, Fileset, FilesetKey, FilesetOwner, FilesetStatus};
use gdc_core::store::StoreError;
use gdc_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::parse_column;

/// A row from the `filesets` table. The three file slots are flattened into
/// `dem_*`, `crs_*` and `xam_*` columns.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FilesetRow {
    pub id: DbId,
    pub owner_kind: String,
    pub owner_id: DbId,
    pub reporting_period_id: DbId,
    pub status: String,
    pub dem_status: String,
    pub dem_file_name: Option<String>,
    pub dem_uploaded_at: Option<Timestamp>,
    pub crs_status: String,
    pub crs_file_name: Option<String>,
    pub crs_uploaded_at: Option<Timestamp>,
    pub xam_status: String,
    pub xam_file_name: Option<String>,
    pub xam_uploaded_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

fn slot(
    column: &'static str,
    status: &str,
    file_name: Option<String>,
    uploaded_at: Option<Timestamp>,
) -> Result<FileSlot, StoreError> {
    Ok(FileSlot {
        status: parse_column(column, status, FileStatus::parse)?,
        file_name,
        uploaded_at,
    })
}

impl TryFrom<FilesetRow> for Fileset {
    type Error = StoreError;

    fn try_from(row: FilesetRow) -> Result<Self, Self::Error> {
        let owner = match row.owner_kind.as_str() {
            "school" => FilesetOwner::School(row.owner_id),
            "district" => FilesetOwner::District(row.owner_id),
            other => {
                return Err(StoreError::Corrupt(format!(
                    "filesets.owner_kind has unknown value '{other}'"
                )))
            }
        };
        Ok(Self {
            id: row.id,
            key: FilesetKey {
                owner,
                reporting_period_id: row.reporting_period_id,
            },
            status: parse_column("filesets.status", &row.status, FilesetStatus::parse)?,
            demographic: slot("filesets.dem_status", &row.dem_status, row.dem_file_name, row.dem_uploaded_at)?,
            course: slot("filesets.crs_status", &row.crs_status, row.crs_file_name, row.crs_uploaded_at)?,
            assessment: slot("filesets.xam_status", &row.xam_status, row.xam_file_name, row.xam_uploaded_at)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

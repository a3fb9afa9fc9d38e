//! Repository for the `error_fileset_students` table.

use gdc_core::finalize::ErrorStudentFlag;
use gdc_core::types::DbId;
use sqlx::PgPool;

use super::PgTx;
use crate::models::error_student::ErrorStudentRow;

/// Column list for the `error_fileset_students` table.
const COLUMNS: &str = "id, fileset_id, pen, reason, severity, file_type, created_at";

pub struct ErrorStudentRepo;

impl ErrorStudentRepo {
    pub async fn list_by_fileset(pool: &PgPool, fileset_id: DbId) -> Result<Vec<ErrorStudentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM error_fileset_students WHERE fileset_id = $1 ORDER BY pen");
        sqlx::query_as::<_, ErrorStudentRow>(&query)
            .bind(fileset_id)
            .fetch_all(pool)
            .await
    }

    /// Insert flags not already present for their `(fileset_id, pen)`.
    /// Returns the number inserted.
    pub async fn insert_many(tx: &mut PgTx<'_>, flags: &[ErrorStudentFlag]) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for flag in flags {
            let result = sqlx::query(
                "INSERT INTO error_fileset_students (fileset_id, pen, reason, severity, file_type) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (fileset_id, pen) DO NOTHING",
            )
            .bind(flag.fileset_id)
            .bind(&flag.pen)
            .bind(flag.reason.as_str())
            .bind(flag.severity.as_str())
            .bind(flag.file_type.as_str())
            .execute(&mut **tx)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    /// Clear a fileset's flags. Re-ingestion invalidates them, and
    /// completion rewrites them.
    pub async fn delete_by_fileset(tx: &mut PgTx<'_>, fileset_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM error_fileset_students WHERE fileset_id = $1")
            .bind(fileset_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

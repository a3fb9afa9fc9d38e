//! Repository for the `fileset_students` and `student_validation_issues`
//! tables.

use gdc_core::fileset::FileType;
use gdc_core::saga::ValidationResult;
use gdc_core::student::AnyStudent;
use gdc_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use super::PgTx;
use crate::models::student::StudentRow;

/// Column list for the `fileset_students` table.
const COLUMNS: &str = "id, fileset_id, file_type, pen, status, record, created_at, updated_at";

pub struct StudentRepo;

impl StudentRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<StudentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM fileset_students WHERE id = $1");
        sqlx::query_as::<_, StudentRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Students of a fileset in insertion order, optionally one file type.
    pub async fn list(
        pool: &PgPool,
        fileset_id: DbId,
        file_type: Option<FileType>,
    ) -> Result<Vec<StudentRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM fileset_students \
             WHERE fileset_id = $1 AND ($2::text IS NULL OR file_type = $2) \
             ORDER BY file_type, id"
        );
        sqlx::query_as::<_, StudentRow>(&query)
            .bind(fileset_id)
            .bind(file_type.map(FileType::as_str))
            .fetch_all(pool)
            .await
    }

    pub async fn find_demographic_by_pen(
        pool: &PgPool,
        fileset_id: DbId,
        pen: &str,
    ) -> Result<Option<StudentRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM fileset_students \
             WHERE fileset_id = $1 AND file_type = 'DEM' AND pen = $2 \
             ORDER BY id \
             LIMIT 1"
        );
        sqlx::query_as::<_, StudentRow>(&query)
            .bind(fileset_id)
            .bind(pen)
            .fetch_optional(pool)
            .await
    }

    /// Students of `file_type` without a COMPLETED or ERROR saga named
    /// `saga_name`.
    pub async fn count_unsettled(
        pool: &PgPool,
        fileset_id: DbId,
        file_type: FileType,
        saga_name: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM fileset_students s \
             WHERE s.fileset_id = $1 AND s.file_type = $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM sagas g \
                   WHERE g.student_id = s.id AND g.saga_name = $3 \
                     AND g.status IN ('COMPLETED', 'ERROR'))",
        )
        .bind(fileset_id)
        .bind(file_type.as_str())
        .bind(saga_name)
        .fetch_one(pool)
        .await
    }

    // -----------------------------------------------------------------------
    // Transaction-scoped writes
    // -----------------------------------------------------------------------

    /// Remove one file type's collection. Issue rows cascade.
    pub async fn delete_by_file_type(
        tx: &mut PgTx<'_>,
        fileset_id: DbId,
        file_type: FileType,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM fileset_students WHERE fileset_id = $1 AND file_type = $2")
            .bind(fileset_id)
            .bind(file_type.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_many(tx: &mut PgTx<'_>, students: &[AnyStudent]) -> Result<(), sqlx::Error> {
        for student in students {
            let header = student.header();
            sqlx::query(
                "INSERT INTO fileset_students (id, fileset_id, file_type, pen, status, record) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(header.id)
            .bind(header.fileset_id)
            .bind(student.file_type().as_str())
            .bind(header.pen.as_deref())
            .bind(header.status.as_str())
            .bind(Json(student))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Write a validation result onto the record and replace its issue
    /// rows. Returns `false` when the student no longer exists.
    pub async fn apply_result(tx: &mut PgTx<'_>, result: &ValidationResult) -> Result<bool, sqlx::Error> {
        let updated = sqlx::query(
            "UPDATE fileset_students SET \
                status = $2, \
                record = jsonb_set(jsonb_set(record, '{status}', to_jsonb($2::text)), '{issues}', $3), \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(result.student_id)
        .bind(result.status.as_str())
        .bind(Json(&result.issues))
        .execute(&mut **tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM student_validation_issues WHERE student_id = $1")
            .bind(result.student_id)
            .execute(&mut **tx)
            .await?;
        for issue in &result.issues {
            sqlx::query(
                "INSERT INTO student_validation_issues \
                    (student_id, severity, field_code, rule_code, issue_code, message) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(result.student_id)
            .bind(issue.severity.as_str())
            .bind(issue.field.as_str())
            .bind(issue.rule.code())
            .bind(issue.code.as_str())
            .bind(&issue.message)
            .execute(&mut **tx)
            .await?;
        }
        Ok(true)
    }
}

//! Repository for the `filesets` table.

use gdc_core::fileset::{FileType, Fileset, FilesetKey, FilesetStatus};
use gdc_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use super::PgTx;
use crate::models::fileset::FilesetRow;

/// Column list for the `filesets` table.
const COLUMNS: &str = "id, owner_kind, owner_id, reporting_period_id, status, \
    dem_status, dem_file_name, dem_uploaded_at, \
    crs_status, crs_file_name, crs_uploaded_at, \
    xam_status, xam_file_name, xam_uploaded_at, \
    created_at, updated_at";

pub struct FilesetRepo;

impl FilesetRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<FilesetRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM filesets WHERE id = $1");
        sqlx::query_as::<_, FilesetRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_status(pool: &PgPool, status: FilesetStatus) -> Result<Vec<FilesetRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM filesets WHERE status = $1 ORDER BY updated_at");
        sqlx::query_as::<_, FilesetRow>(&query)
            .bind(status.as_str())
            .fetch_all(pool)
            .await
    }

    /// Delete LOADED and SUPERSEDED filesets untouched since `cutoff`.
    /// Students, sagas and flags go with them through `ON DELETE CASCADE`.
    pub async fn delete_stale(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM filesets WHERE status IN ('LOADED', 'SUPERSEDED') AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------------
    // Transaction-scoped writes
    // -----------------------------------------------------------------------

    /// Serialize writers on one fileset key until the transaction ends.
    pub async fn lock_key(tx: &mut PgTx<'_>, key: &FilesetKey) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key.lock_key())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Persist per-file and aggregate statuses of a copy read at
    /// `fileset.updated_at`. Superseded filesets, and rows written since the
    /// copy was read, are left untouched. Returns `false` if nothing was
    /// updated.
    pub async fn update_status(tx: &mut PgTx<'_>, fileset: &Fileset) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE filesets SET \
                status = $2, dem_status = $3, crs_status = $4, xam_status = $5, \
                updated_at = now() \
             WHERE id = $1 AND status <> 'SUPERSEDED' AND updated_at = $6",
        )
        .bind(fileset.id)
        .bind(fileset.status.as_str())
        .bind(fileset.demographic.status.as_str())
        .bind(fileset.course.status.as_str())
        .bind(fileset.assessment.status.as_str())
        .bind(fileset.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The key's fileset in `status`, row-locked for the transaction.
    pub async fn find_current_for_update(
        tx: &mut PgTx<'_>,
        key: &FilesetKey,
        status: FilesetStatus,
    ) -> Result<Option<FilesetRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM filesets \
             WHERE owner_kind = $1 AND owner_id = $2 AND reporting_period_id = $3 AND status = $4 \
             FOR UPDATE"
        );
        sqlx::query_as::<_, FilesetRow>(&query)
            .bind(key.owner.kind())
            .bind(key.owner.id())
            .bind(key.reporting_period_id)
            .bind(status.as_str())
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn mark_superseded(tx: &mut PgTx<'_>, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE filesets SET status = 'SUPERSEDED', updated_at = now() \
             WHERE id = $1 AND status = 'COMPLETED'",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert the fileset, or overwrite every mutable column if it exists.
    pub async fn upsert(tx: &mut PgTx<'_>, fileset: &Fileset) -> Result<FilesetRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO filesets ( \
                id, owner_kind, owner_id, reporting_period_id, status, \
                dem_status, dem_file_name, dem_uploaded_at, \
                crs_status, crs_file_name, crs_uploaded_at, \
                xam_status, xam_file_name, xam_uploaded_at, \
                created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (id) DO UPDATE SET \
                status = EXCLUDED.status, \
                dem_status = EXCLUDED.dem_status, \
                dem_file_name = EXCLUDED.dem_file_name, \
                dem_uploaded_at = EXCLUDED.dem_uploaded_at, \
                crs_status = EXCLUDED.crs_status, \
                crs_file_name = EXCLUDED.crs_file_name, \
                crs_uploaded_at = EXCLUDED.crs_uploaded_at, \
                xam_status = EXCLUDED.xam_status, \
                xam_file_name = EXCLUDED.xam_file_name, \
                xam_uploaded_at = EXCLUDED.xam_uploaded_at, \
                updated_at = EXCLUDED.updated_at \
             RETURNING {COLUMNS}"
        );
        let mut q = sqlx::query_as::<_, FilesetRow>(&query)
            .bind(fileset.id)
            .bind(fileset.key.owner.kind())
            .bind(fileset.key.owner.id())
            .bind(fileset.key.reporting_period_id)
            .bind(fileset.status.as_str());
        for file_type in FileType::ALL {
            let slot = fileset.slot(file_type);
            q = q
                .bind(slot.status.as_str())
                .bind(slot.file_name.clone())
                .bind(slot.uploaded_at);
        }
        q.bind(fileset.created_at)
            .bind(fileset.updated_at)
            .fetch_one(&mut **tx)
            .await
    }
}

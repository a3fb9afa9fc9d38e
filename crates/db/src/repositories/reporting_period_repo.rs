//! Repository for the `reporting_periods` table.

use chrono::NaiveDate;
use gdc_core::fileset::ReportingPeriod;
use sqlx::PgPool;

use crate::models::reporting_period::ReportingPeriodRow;

/// Column list for the `reporting_periods` table.
const COLUMNS: &str = "id, school_year_start, school_year_end, summer_start, summer_end, created_at";

pub struct ReportingPeriodRepo;

impl ReportingPeriodRepo {
    /// The period whose school-year or summer window contains `on`.
    ///
    /// Windows should not overlap; if they do, the most recent school year
    /// wins.
    pub async fn find_active(pool: &PgPool, on: NaiveDate) -> Result<Option<ReportingPeriodRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM reporting_periods \
             WHERE ($1 BETWEEN school_year_start AND school_year_end) \
                OR ($1 BETWEEN summer_start AND summer_end) \
             ORDER BY school_year_start DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, ReportingPeriodRow>(&query)
            .bind(on)
            .fetch_optional(pool)
            .await
    }

    /// Insert a period, or refresh its windows if the id already exists.
    pub async fn upsert(pool: &PgPool, period: &ReportingPeriod) -> Result<ReportingPeriodRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO reporting_periods \
                (id, school_year_start, school_year_end, summer_start, summer_end) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
                school_year_start = EXCLUDED.school_year_start, \
                school_year_end = EXCLUDED.school_year_end, \
                summer_start = EXCLUDED.summer_start, \
                summer_end = EXCLUDED.summer_end \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ReportingPeriodRow>(&query)
            .bind(period.id)
            .bind(period.school_year_start)
            .bind(period.school_year_end)
            .bind(period.summer_start)
            .bind(period.summer_end)
            .fetch_one(pool)
            .await
    }
}

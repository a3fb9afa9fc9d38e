//! Reporting period entity model.

use chrono::NaiveDate;
use gdc_core::fileset::ReportingPeriod;
use gdc_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `reporting_periods` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReportingPeriodRow {
    pub id: DbId,
    pub school_year_start: NaiveDate,
    pub school_year_end: NaiveDate,
    pub summer_start: NaiveDate,
    pub summer_end: NaiveDate,
    pub created_at: Timestamp,
}

impl From<ReportingPeriodRow> for ReportingPeriod {
    fn from(row: ReportingPeriodRow) -> Self {
        Self {
            id: row.id,
            school_year_start: row.school_year_start,
            school_year_end: row.school_year_end,
            summer_start: row.summer_start,
            summer_end: row.summer_end,
        }
    }
}

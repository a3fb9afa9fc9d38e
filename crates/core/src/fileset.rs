//! Fileset aggregate: one school's (or district's) DEM + CRS + XAM files for
//! one reporting period.
//!
//! The student collections themselves live in the store keyed by
//! `fileset_id`; this module owns the status bookkeeping and the rules for
//! deriving the aggregate status from the three per-file statuses.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, UnprocessableReason};
use crate::types::{DbId, Timestamp};

// ── File types ───────────────────────────────────────────────────────

/// The three related files a school uploads each reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Demographic,
    Course,
    Assessment,
}

impl FileType {
    pub const ALL: [FileType; 3] = [Self::Demographic, Self::Course, Self::Assessment];

    /// Short code used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Demographic => "DEM",
            Self::Course => "CRS",
            Self::Assessment => "XAM",
        }
    }

    /// Transaction code every record of this file type must carry.
    pub fn transaction_code(self) -> &'static str {
        match self {
            Self::Demographic => "D02",
            Self::Course => "E08",
            Self::Assessment => "E06",
        }
    }

    /// Lowercase file extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Demographic => "dem",
            Self::Course => "crs",
            Self::Assessment => "xam",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(code))
    }

    /// Derive the file type from an uploaded file name (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Result<Self, CoreError> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|t| t.extension().eq_ignore_ascii_case(ext))
            .ok_or_else(|| {
                CoreError::unprocessable(
                    UnprocessableReason::InvalidExtension,
                    format!("'{file_name}' is not a .dem, .crs or .xam file"),
                )
            })
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Statuses ─────────────────────────────────────────────────────────

/// Per-file status inside a fileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    #[default]
    NotLoaded,
    /// Records ingested, validation still running for at least one of them.
    Loaded,
    /// Every record of this file has a terminal saga.
    Completed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotLoaded => "NOT_LOADED",
            Self::Loaded => "LOADED",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_LOADED" => Some(Self::NotLoaded),
            "LOADED" => Some(Self::Loaded),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }

    /// `true` once a file of this type has been ingested.
    pub fn is_loaded(self) -> bool {
        !matches!(self, Self::NotLoaded)
    }
}

/// Aggregate fileset status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilesetStatus {
    /// Accepting uploads; at least one file missing or still validating.
    Loaded,
    /// All three files loaded and every student saga settled.
    Completed,
    /// A newer fileset replaced this completed one for the same key.
    Superseded,
}

impl FilesetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "LOADED",
            Self::Completed => "COMPLETED",
            Self::Superseded => "SUPERSEDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOADED" => Some(Self::Loaded),
            "COMPLETED" => Some(Self::Completed),
            "SUPERSEDED" => Some(Self::Superseded),
            _ => None,
        }
    }
}

impl std::fmt::Display for FilesetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Ownership & identity ─────────────────────────────────────────────

/// Who a fileset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FilesetOwner {
    School(DbId),
    District(DbId),
}

impl FilesetOwner {
    pub fn id(self) -> DbId {
        match self {
            Self::School(id) | Self::District(id) => id,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            Self::School(_) => "school",
            Self::District(_) => "district",
        }
    }
}

/// Identity of a fileset: owner plus reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilesetKey {
    pub owner: FilesetOwner,
    pub reporting_period_id: DbId,
}

impl FilesetKey {
    /// Stable string used to derive the exclusive write-scope lock.
    pub fn lock_key(&self) -> String {
        format!(
            "fileset:{}:{}:{}",
            self.owner.kind(),
            self.owner.id(),
            self.reporting_period_id
        )
    }
}

/// The school or district an upload is submitted for.
///
/// Every record's MINCODE must fall inside the target: an exact match for a
/// school, or the three-digit district prefix for a district upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestTarget {
    School { school_id: DbId, mincode: String },
    District { district_id: DbId, district_number: String },
}

impl IngestTarget {
    pub fn owner(&self) -> FilesetOwner {
        match self {
            Self::School { school_id, .. } => FilesetOwner::School(*school_id),
            Self::District { district_id, .. } => FilesetOwner::District(*district_id),
        }
    }

    pub fn accepts_mincode(&self, mincode: &str) -> bool {
        let mincode = mincode.trim();
        match self {
            Self::School { mincode: expected, .. } => mincode == expected.trim(),
            Self::District {
                district_number, ..
            } => mincode.len() == 8 && mincode.starts_with(district_number.trim()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::School { mincode, .. } => format!("school {mincode}"),
            Self::District {
                district_number, ..
            } => format!("district {district_number}"),
        }
    }
}

// ── Reporting period ─────────────────────────────────────────────────

/// A collection cycle: the school year plus the following summer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub id: DbId,
    pub school_year_start: NaiveDate,
    pub school_year_end: NaiveDate,
    pub summer_start: NaiveDate,
    pub summer_end: NaiveDate,
}

impl ReportingPeriod {
    /// Whether `date` falls inside the school-year or summer window.
    pub fn contains(&self, date: NaiveDate) -> bool {
        (self.school_year_start..=self.school_year_end).contains(&date)
            || (self.summer_start..=self.summer_end).contains(&date)
    }

    /// Pick the active period for `date` out of a candidate list.
    pub fn active_for(periods: &[ReportingPeriod], date: NaiveDate) -> Option<&ReportingPeriod> {
        periods.iter().find(|p| p.contains(date))
    }
}

// ── Fileset ──────────────────────────────────────────────────────────

/// Status and provenance of one of the three files inside a fileset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSlot {
    pub status: FileStatus,
    pub file_name: Option<String>,
    pub uploaded_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fileset {
    pub id: DbId,
    pub key: FilesetKey,
    pub status: FilesetStatus,
    pub demographic: FileSlot,
    pub course: FileSlot,
    pub assessment: FileSlot,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Fileset {
    /// A fresh fileset with no files loaded.
    pub fn new(id: DbId, key: FilesetKey, now: Timestamp) -> Self {
        Self {
            id,
            key,
            status: FilesetStatus::Loaded,
            demographic: FileSlot::default(),
            course: FileSlot::default(),
            assessment: FileSlot::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn slot(&self, file_type: FileType) -> &FileSlot {
        match file_type {
            FileType::Demographic => &self.demographic,
            FileType::Course => &self.course,
            FileType::Assessment => &self.assessment,
        }
    }

    pub fn slot_mut(&mut self, file_type: FileType) -> &mut FileSlot {
        match file_type {
            FileType::Demographic => &mut self.demographic,
            FileType::Course => &mut self.course,
            FileType::Assessment => &mut self.assessment,
        }
    }

    pub fn all_files_loaded(&self) -> bool {
        FileType::ALL
            .into_iter()
            .all(|t| self.slot(t).status.is_loaded())
    }

    /// Record that `file_type` was just (re)loaded.
    pub fn mark_file_loaded(&mut self, file_type: FileType, file_name: &str, uploaded_at: Timestamp) {
        let slot = self.slot_mut(file_type);
        slot.status = FileStatus::Loaded;
        slot.file_name = Some(file_name.to_string());
        slot.uploaded_at = Some(uploaded_at);
    }

    /// Apply settlement counts (students without a terminal saga per file)
    /// and derive the aggregate status.
    ///
    /// A file becomes `COMPLETED` when it is loaded and none of its students
    /// are unsettled; a loaded file with unsettled students drops back to
    /// `LOADED`. The aggregate is `COMPLETED` iff all three files are loaded
    /// and none has unsettled students. Superseded filesets never change.
    pub fn apply_settlement(&mut self, unsettled: impl Fn(FileType) -> u64) -> FilesetStatus {
        if self.status == FilesetStatus::Superseded {
            return self.status;
        }
        for file_type in FileType::ALL {
            let pending = unsettled(file_type);
            let slot = self.slot_mut(file_type);
            if slot.status.is_loaded() {
                slot.status = if pending == 0 {
                    FileStatus::Completed
                } else {
                    FileStatus::Loaded
                };
            }
        }
        self.status = if FileType::ALL
            .into_iter()
            .all(|t| self.slot(t).status == FileStatus::Completed)
        {
            FilesetStatus::Completed
        } else {
            FilesetStatus::Loaded
        };
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_id;
    use chrono::Utc;

    fn key() -> FilesetKey {
        FilesetKey {
            owner: FilesetOwner::School(new_id()),
            reporting_period_id: new_id(),
        }
    }

    #[test]
    fn file_type_from_extension_is_case_insensitive() {
        assert_eq!(FileType::from_file_name("12345678.DEM").unwrap(), FileType::Demographic);
        assert_eq!(FileType::from_file_name("a.b.crs").unwrap(), FileType::Course);
        assert_eq!(FileType::from_file_name("x.Xam").unwrap(), FileType::Assessment);
    }

    #[test]
    fn bad_extension_is_unprocessable() {
        let err = FileType::from_file_name("students.txt").unwrap_err();
        assert!(matches!(
            err,
            CoreError::FileUnprocessable {
                reason: UnprocessableReason::InvalidExtension,
                ..
            }
        ));
        assert!(FileType::from_file_name("noextension").is_err());
    }

    #[test]
    fn district_target_accepts_schools_in_district() {
        let target = IngestTarget::District {
            district_id: new_id(),
            district_number: "039".into(),
        };
        assert!(target.accepts_mincode("03939001"));
        assert!(!target.accepts_mincode("06139001"));
        assert!(!target.accepts_mincode("039"));
    }

    #[test]
    fn school_target_requires_exact_mincode() {
        let target = IngestTarget::School {
            school_id: new_id(),
            mincode: "03939001".into(),
        };
        assert!(target.accepts_mincode(" 03939001 "));
        assert!(!target.accepts_mincode("03939002"));
    }

    #[test]
    fn reporting_period_covers_summer_window() {
        let period = ReportingPeriod {
            id: new_id(),
            school_year_start: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            school_year_end: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            summer_start: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            summer_end: NaiveDate::from_ymd_opt(2025, 9, 30).unwrap(),
        };
        assert!(period.contains(NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()));
        assert!(!period.contains(NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()));
    }

    #[test]
    fn aggregate_completes_only_when_all_loaded_and_settled() {
        let mut fileset = Fileset::new(new_id(), key(), Utc::now());
        fileset.mark_file_loaded(FileType::Demographic, "a.dem", Utc::now());
        fileset.mark_file_loaded(FileType::Course, "a.crs", Utc::now());
        assert_eq!(fileset.apply_settlement(|_| 0), FilesetStatus::Loaded);
        assert_eq!(fileset.demographic.status, FileStatus::Completed);
        assert_eq!(fileset.assessment.status, FileStatus::NotLoaded);

        fileset.mark_file_loaded(FileType::Assessment, "a.xam", Utc::now());
        let status = fileset.apply_settlement(|t| u64::from(t == FileType::Assessment));
        assert_eq!(status, FilesetStatus::Loaded);
        assert_eq!(fileset.assessment.status, FileStatus::Loaded);

        assert_eq!(fileset.apply_settlement(|_| 0), FilesetStatus::Completed);
    }

    #[test]
    fn superseded_fileset_is_frozen() {
        let mut fileset = Fileset::new(new_id(), key(), Utc::now());
        fileset.status = FilesetStatus::Superseded;
        assert_eq!(fileset.apply_settlement(|_| 0), FilesetStatus::Superseded);
    }
}

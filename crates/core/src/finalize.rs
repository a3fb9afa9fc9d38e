//! Completed-fileset finalization: cross-file presence checks, error-student
//! flags and the issue counts reported for the fileset.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::fileset::FileType;
use crate::student::{AnyStudent, StudentStatus};
use crate::types::DbId;
use crate::validation::Severity;

/// Why a student was flagged on a completed fileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagReason {
    /// At least one record ended validation in ERROR.
    ValidationErrors,
    /// A record's saga settled without a validation result.
    NotValidated,
    /// In DEM but has no CRS records.
    MissingCourseRecords,
    /// In CRS or XAM but not in DEM.
    MissingDemographic,
}

impl FlagReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationErrors => "VALIDATION_ERRORS",
            Self::NotValidated => "NOT_VALIDATED",
            Self::MissingCourseRecords => "MISSING_COURSE_RECORDS",
            Self::MissingDemographic => "MISSING_DEMOGRAPHIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALIDATION_ERRORS" => Some(Self::ValidationErrors),
            "NOT_VALIDATED" => Some(Self::NotValidated),
            "MISSING_COURSE_RECORDS" => Some(Self::MissingCourseRecords),
            "MISSING_DEMOGRAPHIC" => Some(Self::MissingDemographic),
            _ => None,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::ValidationErrors | Self::NotValidated => Severity::Error,
            Self::MissingCourseRecords | Self::MissingDemographic => Severity::Warning,
        }
    }
}

/// One flagged PEN in one fileset. Unique per `(fileset_id, pen)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStudentFlag {
    pub fileset_id: DbId,
    pub pen: String,
    pub reason: FlagReason,
    pub severity: Severity,
    /// File the problem was found in.
    pub file_type: FileType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub errors: u64,
    pub warnings: u64,
    pub infos: u64,
}

impl IssueCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
    }

    fn merge(&mut self, other: IssueCounts) {
        self.errors += other.errors;
        self.warnings += other.warnings;
        self.infos += other.infos;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub students: u64,
    pub validated: u64,
    pub errored: u64,
    pub issues: IssueCounts,
}

/// Final, reportable snapshot of a completed fileset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub per_file: BTreeMap<FileType, FileSummary>,
    pub overall: FileSummary,
    pub flags: Vec<ErrorStudentFlag>,
}

fn pens(students: &[AnyStudent], file_type: FileType) -> BTreeSet<String> {
    students
        .iter()
        .filter(|s| s.file_type() == file_type)
        .filter_map(|s| s.header().pen.clone())
        .collect()
}

/// Build the report for `fileset_id` from every student record it owns.
///
/// At most one flag per PEN; record-level problems (severity ERROR) win over
/// cross-file warnings, then the first file type in DEM, CRS, XAM order.
/// Records without a PEN cannot be flagged and are only counted.
pub fn finalize(fileset_id: DbId, students: &[AnyStudent]) -> FinalizeReport {
    let mut report = FinalizeReport::default();
    for file_type in FileType::ALL {
        report.per_file.insert(file_type, FileSummary::default());
    }

    let mut flags: BTreeMap<String, ErrorStudentFlag> = BTreeMap::new();
    let mut flag = |pen: &str, reason: FlagReason, file_type: FileType| {
        let candidate = ErrorStudentFlag {
            fileset_id,
            pen: pen.to_string(),
            reason,
            severity: reason.severity(),
            file_type,
        };
        match flags.get(pen) {
            Some(existing) if existing.severity <= candidate.severity => {}
            _ => {
                flags.insert(pen.to_string(), candidate);
            }
        }
    };

    for student in students {
        let header = student.header();
        let file_type = student.file_type();
        let summary = report.per_file.entry(file_type).or_default();
        summary.students += 1;
        match header.status {
            StudentStatus::Validated => summary.validated += 1,
            StudentStatus::Error => summary.errored += 1,
            StudentStatus::Loaded => {}
        }
        for issue in &header.issues {
            summary.issues.add(issue.severity);
        }

        if let Some(pen) = header.pen.as_deref() {
            match header.status {
                StudentStatus::Error => flag(pen, FlagReason::ValidationErrors, file_type),
                StudentStatus::Loaded => flag(pen, FlagReason::NotValidated, file_type),
                StudentStatus::Validated => {}
            }
        }
    }

    let dem = pens(students, FileType::Demographic);
    let crs = pens(students, FileType::Course);
    let xam = pens(students, FileType::Assessment);
    for pen in dem.difference(&crs) {
        flag(pen, FlagReason::MissingCourseRecords, FileType::Demographic);
    }
    for pen in crs.difference(&dem) {
        flag(pen, FlagReason::MissingDemographic, FileType::Course);
    }
    for pen in xam.difference(&dem) {
        flag(pen, FlagReason::MissingDemographic, FileType::Assessment);
    }

    for summary in report.per_file.values() {
        report.overall.students += summary.students;
        report.overall.validated += summary.validated;
        report.overall.errored += summary.errored;
        report.overall.issues.merge(summary.issues);
    }
    report.flags = flags.into_values().collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::student::{fields, FieldMap};
    use crate::types::new_id;
    use crate::validation::{FieldCode, IssueCode, RuleId, ValidationIssue};

    fn student(file_type: FileType, pen: &str, status: StudentStatus) -> AnyStudent {
        let mut map = FieldMap::new();
        map.insert(fields::PEN.into(), pen.into());
        let mut s = AnyStudent::from_fields(file_type, &map);
        s.header_mut().status = status;
        s
    }

    #[test]
    fn cross_file_presence_flags_warnings() {
        let fileset_id = new_id();
        let students = vec![
            student(FileType::Demographic, "111111111", StudentStatus::Validated),
            student(FileType::Demographic, "222222222", StudentStatus::Validated),
            student(FileType::Course, "111111111", StudentStatus::Validated),
            student(FileType::Course, "333333333", StudentStatus::Validated),
            student(FileType::Assessment, "444444444", StudentStatus::Validated),
        ];
        let report = finalize(fileset_id, &students);
        let flagged: Vec<(&str, FlagReason)> = report
            .flags
            .iter()
            .map(|f| (f.pen.as_str(), f.reason))
            .collect();
        assert_eq!(
            flagged,
            vec![
                ("222222222", FlagReason::MissingCourseRecords),
                ("333333333", FlagReason::MissingDemographic),
                ("444444444", FlagReason::MissingDemographic),
            ]
        );
        assert!(report.flags.iter().all(|f| f.severity == Severity::Warning));
        assert!(report.flags.iter().all(|f| f.fileset_id == fileset_id));
    }

    #[test]
    fn error_records_are_flagged_once_with_error_severity() {
        let students = vec![
            student(FileType::Demographic, "111111111", StudentStatus::Validated),
            student(FileType::Course, "111111111", StudentStatus::Error),
            student(FileType::Course, "111111111", StudentStatus::Error),
            student(FileType::Assessment, "555555555", StudentStatus::Error),
        ];
        let report = finalize(new_id(), &students);
        assert_eq!(report.flags.len(), 2);
        assert_eq!(report.flags[0].pen, "111111111");
        assert_eq!(report.flags[0].reason, FlagReason::ValidationErrors);
        assert_eq!(report.flags[1].pen, "555555555");
        assert_eq!(report.flags[1].severity, Severity::Error);
    }

    #[test]
    fn counts_per_file_and_overall() {
        let mut crs = student(FileType::Course, "111111111", StudentStatus::Error);
        crs.header_mut().issues = vec![
            ValidationIssue::new(RuleId::C04, FieldCode::CourseCode, IssueCode::CourseCodeInvalid),
            ValidationIssue::new(RuleId::C22, FieldCode::CourseDescription, IssueCode::CourseDescriptionMissing),
        ];
        let mut dem = student(FileType::Demographic, "111111111", StudentStatus::Validated);
        dem.header_mut().issues = vec![ValidationIssue::new(
            RuleId::D31,
            FieldCode::GradRequirementYear,
            IssueCode::StudentAlreadyGraduated,
        )];

        let report = finalize(new_id(), &[dem, crs]);
        let crs_summary = report.per_file[&FileType::Course];
        assert_eq!(crs_summary.errored, 1);
        assert_eq!(crs_summary.issues, IssueCounts { errors: 1, warnings: 1, infos: 0 });
        assert_eq!(report.per_file[&FileType::Assessment], FileSummary::default());
        assert_eq!(report.overall.students, 2);
        assert_eq!(report.overall.issues, IssueCounts { errors: 1, warnings: 1, infos: 1 });
    }

    #[test]
    fn finalize_is_deterministic() {
        let students = vec![
            student(FileType::Demographic, "222222222", StudentStatus::Validated),
            student(FileType::Course, "333333333", StudentStatus::Loaded),
        ];
        let id = new_id();
        assert_eq!(finalize(id, &students), finalize(id, &students));
    }
}

//! Student records for the three file types.
//!
//! The file parsing adapter hands the core one [`FieldMap`] per record; the
//! `from_fields` constructors turn those into typed records. Blank values
//! become `None` so rules never have to distinguish `""` from "absent".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fileset::FileType;
use crate::types::{new_id, DbId};
use crate::validation::issue::{Severity, ValidationIssue};

/// One parsed record: field name → raw submitted value.
pub type FieldMap = BTreeMap<String, String>;

/// Field names produced by the parsing adapter for each layout.
pub mod fields {
    // Shared by all three layouts.
    pub const TRANSACTION_CODE: &str = "transaction_code";
    pub const MINCODE: &str = "mincode";
    pub const LOCAL_ID: &str = "local_id";
    pub const PEN: &str = "pen";
    pub const LEGAL_SURNAME: &str = "legal_surname";

    // DEM
    pub const VENDOR_ID: &str = "vendor_id";
    pub const LEGAL_GIVEN_NAME: &str = "legal_given_name";
    pub const LEGAL_MIDDLE_NAME: &str = "legal_middle_name";
    pub const ADDRESS_LINE_1: &str = "address_line_1";
    pub const ADDRESS_LINE_2: &str = "address_line_2";
    pub const CITY: &str = "city";
    pub const PROVINCE_CODE: &str = "province_code";
    pub const COUNTRY_CODE: &str = "country_code";
    pub const POSTAL_CODE: &str = "postal_code";
    pub const BIRTHDATE: &str = "birthdate";
    pub const GENDER: &str = "gender";
    pub const CITIZENSHIP: &str = "citizenship";
    pub const GRADE: &str = "grade";
    pub const PROGRAM_CODES: [&str; 5] = [
        "program_code_1",
        "program_code_2",
        "program_code_3",
        "program_code_4",
        "program_code_5",
    ];
    pub const PROGRAM_CADRE_FLAG: &str = "program_cadre_flag";
    pub const GRAD_REQUIREMENT_YEAR: &str = "grad_requirement_year";
    pub const SCCP_COMPLETION_DATE: &str = "sccp_completion_date";
    pub const STUDENT_STATUS: &str = "student_status";

    // CRS + XAM
    pub const COURSE_CODE: &str = "course_code";
    pub const COURSE_LEVEL: &str = "course_level";
    pub const COURSE_YEAR: &str = "course_year";
    pub const COURSE_MONTH: &str = "course_month";
    pub const FINAL_PERCENT: &str = "final_percent";
    pub const FINAL_LETTER_GRADE: &str = "final_letter_grade";
    pub const COURSE_STATUS: &str = "course_status";
    pub const NUMBER_OF_CREDITS: &str = "number_of_credits";

    // CRS
    pub const INTERIM_PERCENT: &str = "interim_percent";
    pub const INTERIM_LETTER_GRADE: &str = "interim_letter_grade";
    pub const RELATED_COURSE: &str = "related_course";
    pub const RELATED_LEVEL: &str = "related_level";
    pub const COURSE_DESCRIPTION: &str = "course_description";
    pub const COURSE_TYPE: &str = "course_type";
    pub const COURSE_GRADUATION_REQUIREMENT: &str = "course_graduation_requirement";
    pub const EQUIVALENCY_OR_CHALLENGE: &str = "equivalency_or_challenge";

    // XAM
    pub const INTERIM_SCHOOL_PERCENT: &str = "interim_school_percent";
    pub const FINAL_SCHOOL_PERCENT: &str = "final_school_percent";
    pub const BEST_SCHOOL_PERCENT: &str = "best_school_percent";
    pub const EXAM_PERCENT: &str = "exam_percent";
    pub const E_EXAM_FLAG: &str = "e_exam_flag";
    pub const PROVINCIAL_SPECIAL_CASE: &str = "provincial_special_case";
}

/// Trimmed value of `name`, or `None` when missing or blank.
fn field(map: &FieldMap, name: &str) -> Option<String> {
    map.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ── Processing status ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentStatus {
    #[default]
    Loaded,
    Validated,
    Error,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "LOADED",
            Self::Validated => "VALIDATED",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOADED" => Some(Self::Loaded),
            "VALIDATED" => Some(Self::Validated),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// Status a record settles into after validation produced `issues`.
    pub fn after_validation(issues: &[ValidationIssue]) -> Self {
        if issues.iter().any(|i| i.severity == Severity::Error) {
            Self::Error
        } else {
            Self::Validated
        }
    }
}

// ── Shared header ────────────────────────────────────────────────────

/// Identity and bookkeeping shared by every record variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentHeader {
    pub id: DbId,
    /// Back-reference to the owning fileset; set by the reconciler.
    pub fileset_id: DbId,
    pub status: StudentStatus,
    pub transaction_code: Option<String>,
    pub mincode: Option<String>,
    pub local_id: Option<String>,
    pub pen: Option<String>,
    pub legal_surname: Option<String>,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
}

impl StudentHeader {
    fn from_fields(map: &FieldMap) -> Self {
        Self {
            id: new_id(),
            fileset_id: DbId::nil(),
            status: StudentStatus::Loaded,
            transaction_code: field(map, fields::TRANSACTION_CODE),
            mincode: field(map, fields::MINCODE),
            local_id: field(map, fields::LOCAL_ID),
            pen: field(map, fields::PEN),
            legal_surname: field(map, fields::LEGAL_SURNAME),
            issues: Vec::new(),
        }
    }
}

/// Common access to the header of any record variant.
pub trait StudentRecord {
    const FILE_TYPE: FileType;

    fn header(&self) -> &StudentHeader;
    fn header_mut(&mut self) -> &mut StudentHeader;

    fn id(&self) -> DbId {
        self.header().id
    }

    fn pen(&self) -> Option<&str> {
        self.header().pen.as_deref()
    }
}

// ── DEM ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicStudent {
    #[serde(flatten)]
    pub header: StudentHeader,
    pub vendor_id: Option<String>,
    pub legal_given_name: Option<String>,
    pub legal_middle_name: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub province_code: Option<String>,
    pub country_code: Option<String>,
    pub postal_code: Option<String>,
    pub birthdate: Option<String>,
    pub gender: Option<String>,
    pub citizenship: Option<String>,
    pub grade: Option<String>,
    pub program_codes: Vec<String>,
    pub program_cadre_flag: Option<String>,
    pub grad_requirement_year: Option<String>,
    pub sccp_completion_date: Option<String>,
    pub student_status: Option<String>,
}

impl DemographicStudent {
    pub fn from_fields(map: &FieldMap) -> Self {
        Self {
            header: StudentHeader::from_fields(map),
            vendor_id: field(map, fields::VENDOR_ID),
            legal_given_name: field(map, fields::LEGAL_GIVEN_NAME),
            legal_middle_name: field(map, fields::LEGAL_MIDDLE_NAME),
            address_line_1: field(map, fields::ADDRESS_LINE_1),
            address_line_2: field(map, fields::ADDRESS_LINE_2),
            city: field(map, fields::CITY),
            province_code: field(map, fields::PROVINCE_CODE),
            country_code: field(map, fields::COUNTRY_CODE),
            postal_code: field(map, fields::POSTAL_CODE),
            birthdate: field(map, fields::BIRTHDATE),
            gender: field(map, fields::GENDER),
            citizenship: field(map, fields::CITIZENSHIP),
            grade: field(map, fields::GRADE),
            program_codes: fields::PROGRAM_CODES
                .iter()
                .filter_map(|name| field(map, name))
                .collect(),
            program_cadre_flag: field(map, fields::PROGRAM_CADRE_FLAG),
            grad_requirement_year: field(map, fields::GRAD_REQUIREMENT_YEAR),
            sccp_completion_date: field(map, fields::SCCP_COMPLETION_DATE),
            student_status: field(map, fields::STUDENT_STATUS),
        }
    }
}

impl StudentRecord for DemographicStudent {
    const FILE_TYPE: FileType = FileType::Demographic;

    fn header(&self) -> &StudentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut StudentHeader {
        &mut self.header
    }
}

// ── CRS ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseStudent {
    #[serde(flatten)]
    pub header: StudentHeader,
    pub course_code: Option<String>,
    pub course_level: Option<String>,
    pub course_year: Option<String>,
    pub course_month: Option<String>,
    pub interim_percent: Option<String>,
    pub interim_letter_grade: Option<String>,
    pub final_percent: Option<String>,
    pub final_letter_grade: Option<String>,
    pub course_status: Option<String>,
    pub number_of_credits: Option<String>,
    pub related_course: Option<String>,
    pub related_level: Option<String>,
    pub course_description: Option<String>,
    pub course_type: Option<String>,
    pub course_graduation_requirement: Option<String>,
    pub equivalency_or_challenge: Option<String>,
}

impl CourseStudent {
    pub fn from_fields(map: &FieldMap) -> Self {
        Self {
            header: StudentHeader::from_fields(map),
            course_code: field(map, fields::COURSE_CODE),
            course_level: field(map, fields::COURSE_LEVEL),
            course_year: field(map, fields::COURSE_YEAR),
            course_month: field(map, fields::COURSE_MONTH),
            interim_percent: field(map, fields::INTERIM_PERCENT),
            interim_letter_grade: field(map, fields::INTERIM_LETTER_GRADE),
            final_percent: field(map, fields::FINAL_PERCENT),
            final_letter_grade: field(map, fields::FINAL_LETTER_GRADE),
            course_status: field(map, fields::COURSE_STATUS),
            number_of_credits: field(map, fields::NUMBER_OF_CREDITS),
            related_course: field(map, fields::RELATED_COURSE),
            related_level: field(map, fields::RELATED_LEVEL),
            course_description: field(map, fields::COURSE_DESCRIPTION),
            course_type: field(map, fields::COURSE_TYPE),
            course_graduation_requirement: field(map, fields::COURSE_GRADUATION_REQUIREMENT),
            equivalency_or_challenge: field(map, fields::EQUIVALENCY_OR_CHALLENGE),
        }
    }

    /// `yyyyMM` session built from the year and month columns.
    pub fn session(&self) -> Option<String> {
        session_of(self.course_year.as_deref(), self.course_month.as_deref())
    }
}

impl StudentRecord for CourseStudent {
    const FILE_TYPE: FileType = FileType::Course;

    fn header(&self) -> &StudentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut StudentHeader {
        &mut self.header
    }
}

// ── XAM ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentStudent {
    #[serde(flatten)]
    pub header: StudentHeader,
    pub course_code: Option<String>,
    pub course_level: Option<String>,
    pub course_year: Option<String>,
    pub course_month: Option<String>,
    pub interim_school_percent: Option<String>,
    pub final_school_percent: Option<String>,
    pub best_school_percent: Option<String>,
    pub exam_percent: Option<String>,
    pub final_percent: Option<String>,
    pub final_letter_grade: Option<String>,
    pub e_exam_flag: Option<String>,
    pub provincial_special_case: Option<String>,
    pub course_status: Option<String>,
    pub number_of_credits: Option<String>,
}

impl AssessmentStudent {
    pub fn from_fields(map: &FieldMap) -> Self {
        Self {
            header: StudentHeader::from_fields(map),
            course_code: field(map, fields::COURSE_CODE),
            course_level: field(map, fields::COURSE_LEVEL),
            course_year: field(map, fields::COURSE_YEAR),
            course_month: field(map, fields::COURSE_MONTH),
            interim_school_percent: field(map, fields::INTERIM_SCHOOL_PERCENT),
            final_school_percent: field(map, fields::FINAL_SCHOOL_PERCENT),
            best_school_percent: field(map, fields::BEST_SCHOOL_PERCENT),
            exam_percent: field(map, fields::EXAM_PERCENT),
            final_percent: field(map, fields::FINAL_PERCENT),
            final_letter_grade: field(map, fields::FINAL_LETTER_GRADE),
            e_exam_flag: field(map, fields::E_EXAM_FLAG),
            provincial_special_case: field(map, fields::PROVINCIAL_SPECIAL_CASE),
            course_status: field(map, fields::COURSE_STATUS),
            number_of_credits: field(map, fields::NUMBER_OF_CREDITS),
        }
    }

    pub fn session(&self) -> Option<String> {
        session_of(self.course_year.as_deref(), self.course_month.as_deref())
    }
}

impl StudentRecord for AssessmentStudent {
    const FILE_TYPE: FileType = FileType::Assessment;

    fn header(&self) -> &StudentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut StudentHeader {
        &mut self.header
    }
}

fn session_of(year: Option<&str>, month: Option<&str>) -> Option<String> {
    match (year, month) {
        (Some(y), Some(m)) => Some(format!("{y}{m:0>2}")),
        _ => None,
    }
}

// ── Variants ─────────────────────────────────────────────────────────

/// A record of any file type; the shape stored as a saga payload snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "file_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnyStudent {
    Demographic(DemographicStudent),
    Course(CourseStudent),
    Assessment(AssessmentStudent),
}

impl AnyStudent {
    pub fn file_type(&self) -> FileType {
        match self {
            Self::Demographic(_) => FileType::Demographic,
            Self::Course(_) => FileType::Course,
            Self::Assessment(_) => FileType::Assessment,
        }
    }

    pub fn header(&self) -> &StudentHeader {
        match self {
            Self::Demographic(s) => &s.header,
            Self::Course(s) => &s.header,
            Self::Assessment(s) => &s.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut StudentHeader {
        match self {
            Self::Demographic(s) => &mut s.header,
            Self::Course(s) => &mut s.header,
            Self::Assessment(s) => &mut s.header,
        }
    }

    pub fn id(&self) -> DbId {
        self.header().id
    }

    /// Parse a field map into the variant matching `file_type`.
    pub fn from_fields(file_type: FileType, map: &FieldMap) -> Self {
        match file_type {
            FileType::Demographic => Self::Demographic(DemographicStudent::from_fields(map)),
            FileType::Course => Self::Course(CourseStudent::from_fields(map)),
            FileType::Assessment => Self::Assessment(AssessmentStudent::from_fields(map)),
        }
    }
}

impl From<DemographicStudent> for AnyStudent {
    fn from(value: DemographicStudent) -> Self {
        Self::Demographic(value)
    }
}

impl From<CourseStudent> for AnyStudent {
    fn from(value: CourseStudent) -> Self {
        Self::Course(value)
    }
}

impl From<AssessmentStudent> for AnyStudent {
    fn from(value: AssessmentStudent) -> Self {
        Self::Assessment(value)
    }
}

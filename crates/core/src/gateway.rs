//! External registries consumed by the validation rules.
//!
//! Every lookup may legitimately return "not found" (`Ok(None)` / empty);
//! only transport-level problems surface as [`GatewayError`], and only those
//! are retried by the saga layer.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::DbId;

// ── Registry records ─────────────────────────────────────────────────

/// Student as known to the provincial student registry (keyed by PEN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStudent {
    pub student_id: DbId,
    pub pen: String,
    pub legal_surname: String,
    pub legal_given_name: Option<String>,
    pub legal_middle_names: Option<String>,
    pub birthdate: NaiveDate,
    pub local_id: Option<String>,
    /// `A` active, `D` deceased, `M` merged, `T` terminated.
    pub status_code: String,
    pub mincode: Option<String>,
}

/// A course already on the student's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentCourseRecord {
    pub course_code: String,
    pub course_level: Option<String>,
    /// `yyyyMM`.
    pub session: String,
    pub has_exam: bool,
    pub final_percent: Option<u8>,
    pub final_letter_grade: Option<String>,
}

impl StudentCourseRecord {
    /// Same course and level, ignoring case and blank-vs-missing level.
    pub fn is_course(&self, code: &str, level: Option<&str>) -> bool {
        self.course_code.trim().eq_ignore_ascii_case(code.trim())
            && self.course_level.as_deref().unwrap_or("").trim()
                .eq_ignore_ascii_case(level.unwrap_or("").trim())
    }
}

/// Graduation record held by the GRAD program registry (keyed by student id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradStudentRecord {
    pub student_id: DbId,
    pub program: String,
    pub program_completion_date: Option<NaiveDate>,
    pub student_status: String,
    pub school_of_record: Option<String>,
    #[serde(default)]
    pub courses: Vec<StudentCourseRecord>,
}

/// Catalogue entry for a course code + level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub course_code: String,
    pub course_level: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub completion_end_date: Option<NaiveDate>,
    /// Credit values the course may be reported with.
    pub allowed_credits: Vec<u8>,
    pub examinable: bool,
    /// `true` for locally developed / board authority authorized courses.
    pub locally_developed: bool,
}

impl CourseRecord {
    /// Whether the course is open for a session starting on `session_start`.
    pub fn open_on(&self, session_start: NaiveDate) -> bool {
        let after_start = self.start_date.map_or(true, |d| d <= session_start);
        let before_end = self
            .completion_end_date
            .map_or(true, |d| session_start <= d);
        after_start && before_end
    }
}

// ── Code tables ──────────────────────────────────────────────────────

/// A graduation program with its open window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationProgramCode {
    pub code: String,
    pub effective_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
}

impl GraduationProgramCode {
    pub fn open_on(&self, date: NaiveDate) -> bool {
        self.effective_date <= date && self.expiry_date.map_or(true, |e| date <= e)
    }
}

/// Letter grade with the percentage band it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetterGrade {
    pub grade: String,
    pub percent_low: Option<u8>,
    pub percent_high: Option<u8>,
}

impl LetterGrade {
    /// `true` when the grade has a band and `percent` lies inside it.
    /// Grades without a band (e.g. `W`, `RM`) accept no percentage.
    pub fn covers(&self, percent: u8) -> bool {
        match (self.percent_low, self.percent_high) {
            (Some(lo), Some(hi)) => (lo..=hi).contains(&percent),
            _ => false,
        }
    }

    pub fn has_band(&self) -> bool {
        self.percent_low.is_some() && self.percent_high.is_some()
    }
}

/// Reference code lists, loaded once and shared across a validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeTables {
    pub grade_codes: Vec<String>,
    pub citizenship_codes: Vec<String>,
    pub gender_codes: Vec<String>,
    pub province_codes: Vec<String>,
    pub graduation_programs: Vec<GraduationProgramCode>,
    pub optional_program_codes: Vec<String>,
    pub career_program_codes: Vec<String>,
    pub letter_grades: Vec<LetterGrade>,
    pub equivalency_codes: Vec<String>,
    pub graduation_requirement_codes: Vec<String>,
    pub provincial_special_case_codes: Vec<String>,
}

fn contains_ci(list: &[String], value: &str) -> bool {
    let value = value.trim();
    list.iter().any(|c| c.eq_ignore_ascii_case(value))
}

impl CodeTables {
    pub fn has_grade(&self, code: &str) -> bool {
        contains_ci(&self.grade_codes, code)
    }

    pub fn has_citizenship(&self, code: &str) -> bool {
        contains_ci(&self.citizenship_codes, code)
    }

    pub fn has_gender(&self, code: &str) -> bool {
        contains_ci(&self.gender_codes, code)
    }

    pub fn has_province(&self, code: &str) -> bool {
        contains_ci(&self.province_codes, code)
    }

    pub fn graduation_program(&self, code: &str) -> Option<&GraduationProgramCode> {
        let code = code.trim();
        self.graduation_programs
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code))
    }

    /// Optional programs (e.g. French immersion) and career programs share
    /// the five program-code slots on a DEM record.
    pub fn has_program_code(&self, code: &str) -> bool {
        contains_ci(&self.optional_program_codes, code)
            || contains_ci(&self.career_program_codes, code)
    }

    pub fn letter_grade(&self, grade: &str) -> Option<&LetterGrade> {
        let grade = grade.trim();
        self.letter_grades
            .iter()
            .find(|g| g.grade.eq_ignore_ascii_case(grade))
    }

    pub fn has_equivalency(&self, code: &str) -> bool {
        contains_ci(&self.equivalency_codes, code)
    }

    pub fn has_graduation_requirement(&self, code: &str) -> bool {
        contains_ci(&self.graduation_requirement_codes, code)
    }

    pub fn has_special_case(&self, code: &str) -> bool {
        contains_ci(&self.provincial_special_case_codes, code)
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Timeout, connection reset, 5xx: worth retrying.
    #[error("Transient registry failure: {0}")]
    Transient(String),

    /// The registry answered with something we cannot use.
    #[error("Registry response rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Lookups against the student, GRAD, course and code registries.
#[async_trait]
pub trait ExternalDataGateway: Send + Sync {
    async fn student_by_pen(&self, pen: &str) -> Result<Option<RegistryStudent>, GatewayError>;

    async fn grad_student_record(
        &self,
        student_id: DbId,
    ) -> Result<Option<GradStudentRecord>, GatewayError>;

    async fn student_course_history(
        &self,
        student_id: DbId,
    ) -> Result<Vec<StudentCourseRecord>, GatewayError>;

    async fn course(
        &self,
        course_code: &str,
        course_level: Option<&str>,
    ) -> Result<Option<CourseRecord>, GatewayError>;

    async fn code_tables(&self) -> Result<CodeTables, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_grade_band_is_inclusive() {
        let b = LetterGrade {
            grade: "B".into(),
            percent_low: Some(73),
            percent_high: Some(85),
        };
        assert!(b.covers(73));
        assert!(b.covers(85));
        assert!(!b.covers(86));
    }

    #[test]
    fn bandless_grade_covers_nothing() {
        let w = LetterGrade {
            grade: "W".into(),
            percent_low: None,
            percent_high: None,
        };
        assert!(!w.covers(0));
        assert!(!w.has_band());
    }

    #[test]
    fn code_lookups_ignore_case() {
        let codes = CodeTables {
            citizenship_codes: vec!["C".into(), "O".into()],
            optional_program_codes: vec!["FR".into()],
            career_program_codes: vec!["XC".into()],
            ..Default::default()
        };
        assert!(codes.has_citizenship("c"));
        assert!(!codes.has_citizenship("X"));
        assert!(codes.has_program_code("fr"));
        assert!(codes.has_program_code("xc"));
    }

    #[test]
    fn course_history_match_treats_missing_level_as_blank() {
        let course = StudentCourseRecord {
            course_code: "CLE".into(),
            course_level: None,
            session: "202406".into(),
            has_exam: false,
            final_percent: None,
            final_letter_grade: None,
        };
        assert!(course.is_course("cle", Some(" ")));
        assert!(!course.is_course("CLC", None));
    }

    #[test]
    fn program_window() {
        let p = GraduationProgramCode {
            code: "1996-EN".into(),
            effective_date: NaiveDate::from_ymd_opt(1996, 1, 1).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2024, 6, 30),
        };
        assert!(p.open_on(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()));
        assert!(!p.open_on(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }
}

//! Lookups loaded once per record before the rule pass.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::gateway::{CodeTables, CourseRecord, GradStudentRecord, RegistryStudent, StudentCourseRecord};
use crate::student::DemographicStudent;

/// Everything a rule may consult besides the record itself.
///
/// Built by the validation service before the pass starts, so rules never
/// perform I/O and repeated rules never repeat a remote call. Catalogue
/// entries are keyed by upper-cased course code and level.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub upload_date: NaiveDate,
    /// MINCODE of the school the fileset belongs to, when known.
    pub mincode: Option<String>,
    pub registry_student: Option<RegistryStudent>,
    pub grad_record: Option<GradStudentRecord>,
    pub course_history: Vec<StudentCourseRecord>,
    courses: HashMap<(String, String), CourseRecord>,
    /// DEM record for the same PEN in the same fileset.
    pub demographic: Option<DemographicStudent>,
    pub codes: Arc<CodeTables>,
}

fn course_key(code: &str, level: Option<&str>) -> (String, String) {
    (
        code.trim().to_ascii_uppercase(),
        level.unwrap_or("").trim().to_ascii_uppercase(),
    )
}

impl RunContext {
    pub fn new(upload_date: NaiveDate, codes: Arc<CodeTables>) -> Self {
        Self {
            upload_date,
            mincode: None,
            registry_student: None,
            grad_record: None,
            course_history: Vec::new(),
            courses: HashMap::new(),
            demographic: None,
            codes,
        }
    }

    pub fn with_mincode(mut self, mincode: impl Into<String>) -> Self {
        self.mincode = Some(mincode.into());
        self
    }

    pub fn with_registry_student(mut self, student: Option<RegistryStudent>) -> Self {
        self.registry_student = student;
        self
    }

    pub fn with_grad_record(mut self, record: Option<GradStudentRecord>) -> Self {
        self.grad_record = record;
        self
    }

    pub fn with_course_history(mut self, history: Vec<StudentCourseRecord>) -> Self {
        self.course_history = history;
        self
    }

    pub fn with_demographic(mut self, demographic: Option<DemographicStudent>) -> Self {
        self.demographic = demographic;
        self
    }

    pub fn with_course(mut self, course: CourseRecord) -> Self {
        self.insert_course(course);
        self
    }

    pub fn insert_course(&mut self, course: CourseRecord) {
        let key = course_key(&course.course_code, course.course_level.as_deref());
        self.courses.insert(key, course);
    }

    /// Catalogue entry for `code` + `level`, if the catalogue has one.
    pub fn course(&self, code: &str, level: Option<&str>) -> Option<&CourseRecord> {
        self.courses.get(&course_key(code, level))
    }

    /// Graduation program the student is reported on in this fileset's DEM.
    pub fn reported_program(&self) -> Option<&str> {
        self.demographic
            .as_ref()
            .and_then(|d| d.grad_requirement_year.as_deref())
    }
}

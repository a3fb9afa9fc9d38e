//! Validation issue, severity, field and issue-code types.

use serde::{Deserialize, Serialize};

use super::format::escape_html;
use super::rule::RuleId;

/// Whether an issue blocks promotion of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ERROR" => Some(Self::Error),
            "WARNING" => Some(Self::Warning),
            "INFO" => Some(Self::Info),
            _ => None,
        }
    }

    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Error)
    }
}

macro_rules! define_field_codes {
    ( $( $variant:ident => $code:literal ),+ $(,)? ) => {
        /// The submitted field an issue refers to.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum FieldCode {
            $( #[serde(rename = $code)] $variant ),+
        }

        impl FieldCode {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $code ),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

define_field_codes! {
    Pen => "PEN",
    LocalId => "LOCAL_ID",
    LegalSurname => "LEGAL_SURNAME",
    LegalGivenName => "LEGAL_GIVEN_NAME",
    LegalMiddleName => "LEGAL_MIDDLE_NAME",
    Birthdate => "BIRTHDATE",
    StudentStatus => "STUDENT_STATUS",
    Citizenship => "CITIZENSHIP",
    Grade => "GRADE",
    Gender => "GENDER",
    AddressLine1 => "ADDRESS_LINE_1",
    PostalCode => "POSTAL_CODE",
    ProvinceCode => "PROVINCE_CODE",
    CountryCode => "COUNTRY_CODE",
    GradRequirementYear => "GRAD_REQUIREMENT_YEAR",
    SccpCompletionDate => "SCCP_COMPLETION_DATE",
    ProgramCode => "PROGRAM_CODE",
    ProgramCadreFlag => "PROGRAM_CADRE_FLAG",
    CourseCode => "COURSE_CODE",
    CourseSession => "COURSE_SESSION",
    InterimPercent => "INTERIM_PERCENT",
    InterimLetterGrade => "INTERIM_LETTER_GRADE",
    FinalPercent => "FINAL_PERCENT",
    FinalLetterGrade => "FINAL_LETTER_GRADE",
    CourseStatus => "COURSE_STATUS",
    NumberOfCredits => "NUMBER_OF_CREDITS",
    EquivalencyOrChallenge => "EQUIVALENCY_OR_CHALLENGE",
    CourseGraduationRequirement => "COURSE_GRADUATION_REQUIREMENT",
    RelatedCourse => "RELATED_COURSE",
    CourseDescription => "COURSE_DESCRIPTION",
    SchoolPercent => "SCHOOL_PERCENT",
    BestSchoolPercent => "BEST_SCHOOL_PERCENT",
    ExamPercent => "EXAM_PERCENT",
    ProvincialSpecialCase => "PROVINCIAL_SPECIAL_CASE",
}

macro_rules! define_issue_codes {
    ( $( $variant:ident => ($code:literal, $severity:ident, $message:literal) ),+ $(,)? ) => {
        /// Catalogue of issue codes with their severity and display message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum IssueCode {
            $( #[serde(rename = $code)] $variant ),+
        }

        impl IssueCode {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $code ),+
                }
            }

            pub fn severity(self) -> Severity {
                match self {
                    $( Self::$variant => Severity::$severity ),+
                }
            }

            pub fn message(self) -> &'static str {
                match self {
                    $( Self::$variant => $message ),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

define_issue_codes! {
    // Identity (all file types)
    StudentPenBlank => ("STUDENT_PEN_BLANK", Error, "PEN is blank. Correct the PEN in your school system."),
    StudentPenInvalid => ("STUDENT_PEN_INVALID", Error, "PEN must be nine digits with a valid check digit."),
    StudentPenNotFound => ("STUDENT_PEN_NOT_FOUND", Error, "PEN was not found in the student registry."),
    StudentLocalIdMismatch => ("STUDENT_LOCAL_ID_MISMATCH", Warning, "Local ID does not match the student registry."),

    // DEM
    StudentSurnameBlank => ("STUDENT_SURNAME_BLANK", Error, "Legal surname is blank."),
    StudentSurnameMismatch => ("STUDENT_SURNAME_MISMATCH", Error, "Legal surname does not match the student registry."),
    StudentGivenMismatch => ("STUDENT_GIVEN_MISMATCH", Error, "Legal given name does not match the student registry."),
    StudentMiddleMismatch => ("STUDENT_MIDDLE_MISMATCH", Warning, "Legal middle name does not match the student registry."),
    StudentBirthdateInvalid => ("STUDENT_BIRTHDATE_INVALID", Error, "Birthdate must be a valid date in YYYYMMDD format."),
    StudentBirthdateMismatch => ("STUDENT_BIRTHDATE_MISMATCH", Error, "Birthdate does not match the student registry."),
    StudentStatusInvalid => ("STUDENT_STATUS_INVALID", Error, "Student status must be A, D, M or T."),
    StudentStatusMismatch => ("STUDENT_STATUS_MISMATCH", Error, "Student status does not match the student registry."),
    StudentStatusGradMismatch => ("STUDENT_STATUS_GRAD_MISMATCH", Warning, "Student status does not match the student's GRAD record."),
    StudentCitizenshipCodeInvalid => ("STUDENT_CITIZENSHIP_CODE_INVALID", Error, "Citizenship must be blank or a valid citizenship code."),
    StudentGradeInvalid => ("STUDENT_GRADE_INVALID", Error, "Grade is not a valid grade code."),
    StudentGradeProgramMismatch => ("STUDENT_GRADE_PROGRAM_MISMATCH", Error, "Adult grades (AD, AN) may only be reported on the 1950 adult graduation program."),
    StudentGenderInvalid => ("STUDENT_GENDER_INVALID", Warning, "Gender is not a valid gender code."),
    StudentAddressBlank => ("STUDENT_ADDRESS_BLANK", Warning, "Student address is blank; transcripts cannot be mailed."),
    StudentPostalCodeInvalid => ("STUDENT_POSTAL_CODE_INVALID", Warning, "Postal code must be a valid Canadian postal code (A1A1A1)."),
    StudentProvinceCodeInvalid => ("STUDENT_PROVINCE_CODE_INVALID", Warning, "Province is not a valid province or territory code."),
    StudentCountryCodeInvalid => ("STUDENT_COUNTRY_CODE_INVALID", Warning, "Country must be a two-letter country code."),
    StudentProgramInvalid => ("STUDENT_PROGRAM_INVALID", Error, "Graduation program is not a valid program code."),
    StudentProgramClosed => ("STUDENT_PROGRAM_CLOSED", Error, "Graduation program is closed and cannot be reported."),
    StudentAdultProgramUnderage => ("STUDENT_ADULT_PROGRAM_UNDERAGE", Error, "Students on the 1950 adult program must be at least 18 years old."),
    StudentSccpDateInvalid => ("STUDENT_SCCP_DATE_INVALID", Error, "SCCP completion date must be a valid date in YYYYMMDD format."),
    StudentSccpDateFuture => ("STUDENT_SCCP_DATE_FUTURE", Error, "SCCP completion date cannot be in the future."),
    StudentSccpDateWrongProgram => ("STUDENT_SCCP_DATE_WRONG_PROGRAM", Error, "SCCP completion date reported for a student who is not on the SCCP program."),
    StudentOptionalProgramInvalid => ("STUDENT_OPTIONAL_PROGRAM_INVALID", Error, "Program code is not a valid optional or career program."),
    StudentProgramCadreFlagInvalid => ("STUDENT_PROGRAM_CADRE_FLAG_INVALID", Error, "Program cadre flag must be Y, N or blank."),
    StudentProgramGradMismatch => ("STUDENT_PROGRAM_GRAD_MISMATCH", Warning, "Graduation program differs from the program on the student's GRAD record."),
    StudentAlreadyGraduated => ("STUDENT_ALREADY_GRADUATED", Info, "Student has already completed a graduation program."),

    // CRS + XAM
    CourseCodeInvalid => ("COURSE_CODE_INVALID", Error, "Course code and level are not in the course catalogue."),
    CourseSessionInvalid => ("COURSE_SESSION_INVALID", Error, "Course session must be a valid year (1984 or later) and month."),
    CourseSessionFuture => ("COURSE_SESSION_FUTURE", Error, "Course session is more than a year after the upload date."),
    CourseClosed => ("COURSE_CLOSED", Error, "Course is not open for the reported session."),
    InterimPercentInvalid => ("INTERIM_PERCENT_INVALID", Error, "Interim percent must be a whole number from 0 to 100."),
    InterimLetterGradeInvalid => ("INTERIM_LETTER_GRADE_INVALID", Error, "Interim letter grade is not a valid letter grade."),
    InterimGradeMismatch => ("INTERIM_GRADE_MISMATCH", Warning, "Interim percent does not fall within the interim letter grade range."),
    FinalPercentInvalid => ("FINAL_PERCENT_INVALID", Error, "Final percent must be a whole number from 0 to 100."),
    FinalLetterGradeInvalid => ("FINAL_LETTER_GRADE_INVALID", Error, "Final letter grade is not a valid letter grade."),
    FinalGradeMismatch => ("FINAL_GRADE_MISMATCH", Error, "Final percent does not fall within the final letter grade range."),
    CourseStatusInvalid => ("COURSE_STATUS_INVALID", Error, "Course status must be A (active) or W (withdrawn)."),
    WithdrawnCourseHasMark => ("WITHDRAWN_COURSE_HAS_MARK", Warning, "Withdrawn course was reported with a final mark."),
    CreditsInvalid => ("NUMBER_OF_CREDITS_INVALID", Error, "Number of credits must be a whole number from 0 to 4."),
    CreditsNotOffered => ("NUMBER_OF_CREDITS_NOT_OFFERED", Error, "Course is not offered with the reported number of credits."),
    EquivalencyChallengeInvalid => ("EQUIVALENCY_CHALLENGE_INVALID", Error, "Equivalency or challenge code must be E, C or blank."),
    GraduationRequirementInvalid => ("GRADUATION_REQUIREMENT_INVALID", Error, "Course graduation requirement is not a valid code."),
    GraduationRequirementProgram => ("GRADUATION_REQUIREMENT_PROGRAM", Error, "Fine arts / applied skills requirement codes only apply to the 1996 program."),
    RelatedCourseInvalid => ("RELATED_COURSE_INVALID", Error, "Related course and level are not in the course catalogue."),
    CourseDescriptionMissing => ("COURSE_DESCRIPTION_MISSING", Warning, "Locally developed courses should include a course description."),
    CourseExamExists => ("COURSE_EXAM_EXISTS", Error, "Course already has an exam result in the student registry for this session."),
    CourseExamExistsGrad => ("COURSE_EXAM_EXISTS_GRAD", Error, "Course already has an exam result on the student's GRAD record for this session."),

    // XAM
    CourseNotExaminable => ("COURSE_NOT_EXAMINABLE", Error, "Course is not an examinable course."),
    SchoolPercentInvalid => ("SCHOOL_PERCENT_INVALID", Error, "School percent must be a whole number from 0 to 100."),
    BestSchoolPercentInvalid => ("BEST_SCHOOL_PERCENT_INVALID", Error, "Best school percent must be a whole number from 0 to 100."),
    ExamPercentInvalid => ("EXAM_PERCENT_INVALID", Error, "Exam percent must be a whole number from 0 to 100."),
    SpecialCaseInvalid => ("PROVINCIAL_SPECIAL_CASE_INVALID", Error, "Provincial special case is not a valid code."),
    ExamAlreadyWritten => ("EXAM_ALREADY_WRITTEN", Warning, "Student already has an exam result for this course and session."),
}

/// One problem found on one record by one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub field: FieldCode,
    pub rule: RuleId,
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    /// Issue with the code's default severity and message.
    pub fn new(rule: RuleId, field: FieldCode, code: IssueCode) -> Self {
        Self {
            severity: code.severity(),
            field,
            rule,
            code,
            message: code.message().to_string(),
        }
    }

    /// Issue whose message echoes the submitted value, HTML-escaped.
    pub fn echoing(rule: RuleId, field: FieldCode, code: IssueCode, submitted: &str) -> Self {
        let mut issue = Self::new(rule, field, code);
        issue.message = format!("{} Submitted value: {}", code.message(), escape_html(submitted));
        issue
    }
}

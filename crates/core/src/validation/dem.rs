//! Demographic (DEM) rules.

use super::common::{self, check, check_all, pending};
use super::context::RunContext;
use super::format::{
    age_in_years, is_canadian_postal_code, is_country_code, parse_yyyymmdd, same_text,
};
use super::issue::{FieldCode, IssueCode, ValidationIssue};
use super::rule::{RuleId, ValidationRule};
use crate::student::DemographicStudent;

/// Adult graduation program; the only program adult grades may be reported on.
pub const ADULT_PROGRAM: &str = "1950";
/// School Completion Certificate Program.
pub const SCCP_PROGRAM: &str = "SCCP";
/// Minimum age for the adult program.
pub const ADULT_MIN_AGE: i32 = 18;

const ADULT_GRADES: &[&str] = &["AD", "AN"];
const STUDENT_STATUS_CODES: &[&str] = &["A", "D", "M", "T"];

type Dem = DemographicStudent;

pub fn rules() -> Vec<Box<dyn ValidationRule<Dem>>> {
    vec![
        check(RuleId::D01, common::pen_blank),
        check(RuleId::D02, common::pen_check_digit),
        check(RuleId::D03, common::pen_not_found),
        check(RuleId::D04, common::local_id_mismatch),
        check(RuleId::D05, surname_blank),
        check(RuleId::D06, surname_mismatch),
        check(RuleId::D07, birthdate_invalid),
        check(RuleId::D08, birthdate_mismatch),
        check(RuleId::D09, given_name_mismatch),
        check(RuleId::D10, middle_name_mismatch),
        check(RuleId::D11, student_status_invalid),
        check(RuleId::D12, student_status_mismatch),
        check(RuleId::D13, student_status_grad_mismatch),
        check(RuleId::D14, citizenship_invalid),
        check(RuleId::D15, grade_invalid),
        check(RuleId::D16, adult_grade_on_other_program),
        check(RuleId::D17, gender_invalid),
        check(RuleId::D18, address_blank),
        check(RuleId::D19, postal_code_invalid),
        check(RuleId::D20, province_invalid),
        check(RuleId::D21, country_invalid),
        check(RuleId::D22, program_invalid),
        check(RuleId::D23, program_closed),
        check(RuleId::D24, adult_program_underage),
        check(RuleId::D25, sccp_date_invalid),
        check(RuleId::D26, sccp_date_future),
        check(RuleId::D27, sccp_date_wrong_program),
        check_all(RuleId::D28, optional_programs_invalid),
        check(RuleId::D29, program_cadre_flag_invalid),
        check(RuleId::D30, program_grad_mismatch),
        check(RuleId::D31, already_graduated),
        pending(RuleId::D32, "student transferred between schools mid-year"),
        pending(RuleId::D33, "school of record changed since the previous collection"),
    ]
}

fn is_adult_program(program: &str) -> bool {
    program.trim().eq_ignore_ascii_case(ADULT_PROGRAM)
}

fn surname_blank(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    r.header
        .legal_surname
        .is_none()
        .then(|| ValidationIssue::new(rule, FieldCode::LegalSurname, IssueCode::StudentSurnameBlank))
}

fn surname_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let registry = ctx.registry_student.as_ref()?;
    let submitted = r.header.legal_surname.as_deref();
    (!same_text(submitted, Some(&registry.legal_surname))).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::LegalSurname,
            IssueCode::StudentSurnameMismatch,
            submitted.unwrap_or(""),
        )
    })
}

fn birthdate_invalid(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.birthdate.as_deref().unwrap_or("");
    parse_yyyymmdd(submitted).is_none().then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::Birthdate,
            IssueCode::StudentBirthdateInvalid,
            submitted,
        )
    })
}

fn birthdate_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let registry = ctx.registry_student.as_ref()?;
    let submitted = r.birthdate.as_deref()?;
    let birthdate = parse_yyyymmdd(submitted)?;
    (birthdate != registry.birthdate).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::Birthdate,
            IssueCode::StudentBirthdateMismatch,
            submitted,
        )
    })
}

fn given_name_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let registry = ctx.registry_student.as_ref()?;
    let submitted = r.legal_given_name.as_deref();
    (!same_text(submitted, registry.legal_given_name.as_deref())).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::LegalGivenName,
            IssueCode::StudentGivenMismatch,
            submitted.unwrap_or(""),
        )
    })
}

fn middle_name_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let registry = ctx.registry_student.as_ref()?;
    let submitted = r.legal_middle_name.as_deref();
    (!same_text(submitted, registry.legal_middle_names.as_deref())).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::LegalMiddleName,
            IssueCode::StudentMiddleMismatch,
            submitted.unwrap_or(""),
        )
    })
}

fn student_status_invalid(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.student_status.as_deref().unwrap_or("");
    let valid = STUDENT_STATUS_CODES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(submitted));
    (!valid).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::StudentStatus,
            IssueCode::StudentStatusInvalid,
            submitted,
        )
    })
}

fn student_status_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let registry = ctx.registry_student.as_ref()?;
    let submitted = r.student_status.as_deref()?;
    (!same_text(Some(submitted), Some(&registry.status_code))).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::StudentStatus,
            IssueCode::StudentStatusMismatch,
            submitted,
        )
    })
}

/// GRAD uses its own status vocabulary.
fn grad_status_matches(submitted: &str, grad_status: &str) -> bool {
    let expected: &[&str] = match submitted.to_ascii_uppercase().as_str() {
        "A" => &["CUR", "ARC"],
        "D" => &["DEC"],
        "M" => &["MER"],
        "T" => &["TER"],
        _ => return true,
    };
    expected
        .iter()
        .any(|s| s.eq_ignore_ascii_case(grad_status.trim()))
}

fn student_status_grad_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let grad = ctx.grad_record.as_ref()?;
    let submitted = r.student_status.as_deref()?;
    (!grad_status_matches(submitted, &grad.student_status)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::StudentStatus,
            IssueCode::StudentStatusGradMismatch,
            submitted,
        )
    })
}

/// Blank citizenship is allowed.
fn citizenship_invalid(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.citizenship.as_deref()?;
    (!ctx.codes.has_citizenship(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::Citizenship,
            IssueCode::StudentCitizenshipCodeInvalid,
            submitted,
        )
    })
}

fn grade_invalid(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.grade.as_deref().unwrap_or("");
    (!ctx.codes.has_grade(submitted)).then(|| {
        ValidationIssue::echoing(rule, FieldCode::Grade, IssueCode::StudentGradeInvalid, submitted)
    })
}

fn adult_grade_on_other_program(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let grade = r.grade.as_deref()?;
    let program = r.grad_requirement_year.as_deref()?;
    let adult_grade = ADULT_GRADES.iter().any(|g| g.eq_ignore_ascii_case(grade));
    (adult_grade && !is_adult_program(program)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::Grade,
            IssueCode::StudentGradeProgramMismatch,
            grade,
        )
    })
}

fn gender_invalid(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.gender.as_deref().unwrap_or("");
    (!ctx.codes.has_gender(submitted)).then(|| {
        ValidationIssue::echoing(rule, FieldCode::Gender, IssueCode::StudentGenderInvalid, submitted)
    })
}

fn address_blank(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    r.address_line_1
        .is_none()
        .then(|| ValidationIssue::new(rule, FieldCode::AddressLine1, IssueCode::StudentAddressBlank))
}

/// Only Canadian addresses are held to the Canadian pattern.
fn postal_code_invalid(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.postal_code.as_deref()?;
    let canadian = r
        .country_code
        .as_deref()
        .map_or(true, |c| c.eq_ignore_ascii_case("CA"));
    (canadian && !is_canadian_postal_code(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::PostalCode,
            IssueCode::StudentPostalCodeInvalid,
            submitted,
        )
    })
}

fn province_invalid(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.province_code.as_deref()?;
    (!ctx.codes.has_province(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::ProvinceCode,
            IssueCode::StudentProvinceCodeInvalid,
            submitted,
        )
    })
}

fn country_invalid(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.country_code.as_deref()?;
    (!is_country_code(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::CountryCode,
            IssueCode::StudentCountryCodeInvalid,
            submitted,
        )
    })
}

fn program_invalid(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.grad_requirement_year.as_deref().unwrap_or("");
    ctx.codes.graduation_program(submitted).is_none().then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::GradRequirementYear,
            IssueCode::StudentProgramInvalid,
            submitted,
        )
    })
}

fn program_closed(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.grad_requirement_year.as_deref()?;
    let program = ctx.codes.graduation_program(submitted)?;
    (!program.open_on(ctx.upload_date)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::GradRequirementYear,
            IssueCode::StudentProgramClosed,
            submitted,
        )
    })
}

fn adult_program_underage(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let program = r.grad_requirement_year.as_deref()?;
    if !is_adult_program(program) {
        return None;
    }
    let birthdate = parse_yyyymmdd(r.birthdate.as_deref()?)?;
    (age_in_years(birthdate, ctx.upload_date) < ADULT_MIN_AGE).then(|| {
        ValidationIssue::new(
            rule,
            FieldCode::GradRequirementYear,
            IssueCode::StudentAdultProgramUnderage,
        )
    })
}

fn sccp_date_invalid(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.sccp_completion_date.as_deref()?;
    parse_yyyymmdd(submitted).is_none().then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::SccpCompletionDate,
            IssueCode::StudentSccpDateInvalid,
            submitted,
        )
    })
}

fn sccp_date_future(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.sccp_completion_date.as_deref()?;
    let date = parse_yyyymmdd(submitted)?;
    (date > ctx.upload_date).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::SccpCompletionDate,
            IssueCode::StudentSccpDateFuture,
            submitted,
        )
    })
}

fn sccp_date_wrong_program(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.sccp_completion_date.as_deref()?;
    let program = r.grad_requirement_year.as_deref().unwrap_or("");
    (!program.eq_ignore_ascii_case(SCCP_PROGRAM)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::SccpCompletionDate,
            IssueCode::StudentSccpDateWrongProgram,
            submitted,
        )
    })
}

fn optional_programs_invalid(rule: RuleId, r: &Dem, ctx: &RunContext) -> Vec<ValidationIssue> {
    r.program_codes
        .iter()
        .filter(|code| !ctx.codes.has_program_code(code))
        .map(|code| {
            ValidationIssue::echoing(
                rule,
                FieldCode::ProgramCode,
                IssueCode::StudentOptionalProgramInvalid,
                code,
            )
        })
        .collect()
}

fn program_cadre_flag_invalid(rule: RuleId, r: &Dem, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.program_cadre_flag.as_deref()?;
    let valid = submitted.eq_ignore_ascii_case("Y") || submitted.eq_ignore_ascii_case("N");
    (!valid).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::ProgramCadreFlag,
            IssueCode::StudentProgramCadreFlagInvalid,
            submitted,
        )
    })
}

fn program_grad_mismatch(rule: RuleId, r: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let grad = ctx.grad_record.as_ref()?;
    let submitted = r.grad_requirement_year.as_deref()?;
    (!same_text(Some(submitted), Some(&grad.program))).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::GradRequirementYear,
            IssueCode::StudentProgramGradMismatch,
            submitted,
        )
    })
}

fn already_graduated(rule: RuleId, _: &Dem, ctx: &RunContext) -> Option<ValidationIssue> {
    let grad = ctx.grad_record.as_ref()?;
    grad.program_completion_date.map(|_| {
        ValidationIssue::new(
            rule,
            FieldCode::GradRequirementYear,
            IssueCode::StudentAlreadyGraduated,
        )
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::gateway::{CodeTables, GradStudentRecord, GraduationProgramCode, RegistryStudent};
    use crate::student::{fields, FieldMap};
    use crate::types::new_id;
    use crate::validation::issue::Severity;
    use crate::validation::common::run_pass;

    const PEN: &str = "120164447";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn codes() -> CodeTables {
        CodeTables {
            grade_codes: vec!["10".into(), "11".into(), "12".into(), "AD".into(), "AN".into()],
            citizenship_codes: vec!["C".into(), "O".into()],
            gender_codes: vec!["M".into(), "F".into(), "X".into(), "U".into()],
            province_codes: vec!["BC".into(), "AB".into()],
            graduation_programs: vec![
                GraduationProgramCode {
                    code: "2018-EN".into(),
                    effective_date: date(2018, 7, 1),
                    expiry_date: None,
                },
                GraduationProgramCode {
                    code: "1950".into(),
                    effective_date: date(1950, 1, 1),
                    expiry_date: None,
                },
                GraduationProgramCode {
                    code: "1986-EN".into(),
                    effective_date: date(1986, 1, 1),
                    expiry_date: Some(date(2020, 6, 30)),
                },
                GraduationProgramCode {
                    code: "SCCP".into(),
                    effective_date: date(1995, 1, 1),
                    expiry_date: None,
                },
            ],
            optional_program_codes: vec!["FR".into(), "AD".into()],
            career_program_codes: vec!["XC".into()],
            ..Default::default()
        }
    }

    fn registry() -> RegistryStudent {
        RegistryStudent {
            student_id: new_id(),
            pen: PEN.into(),
            legal_surname: "SMITH".into(),
            legal_given_name: Some("JANE".into()),
            legal_middle_names: None,
            birthdate: date(2007, 3, 14),
            local_id: Some("L-100".into()),
            status_code: "A".into(),
            mincode: Some("03939000".into()),
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(date(2024, 9, 30), Arc::new(codes())).with_registry_student(Some(registry()))
    }

    fn valid_fields() -> FieldMap {
        [
            (fields::PEN, PEN),
            (fields::LOCAL_ID, "L-100"),
            (fields::LEGAL_SURNAME, "Smith"),
            (fields::LEGAL_GIVEN_NAME, "Jane"),
            (fields::BIRTHDATE, "20070314"),
            (fields::STUDENT_STATUS, "A"),
            (fields::GRADE, "12"),
            (fields::GENDER, "F"),
            (fields::ADDRESS_LINE_1, "1 Main St"),
            (fields::POSTAL_CODE, "V8W2Y2"),
            (fields::PROVINCE_CODE, "BC"),
            (fields::COUNTRY_CODE, "CA"),
            (fields::GRAD_REQUIREMENT_YEAR, "2018-EN"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn dem_with(overrides: &[(&str, &str)]) -> Dem {
        let mut map = valid_fields();
        for (k, v) in overrides {
            map.insert(k.to_string(), v.to_string());
        }
        Dem::from_fields(&map)
    }

    fn sorted_rules() -> Vec<Box<dyn ValidationRule<Dem>>> {
        let mut rules = rules();
        rules.sort_by_key(|r| r.id().priority());
        rules
    }

    fn run(record: &Dem, ctx: &RunContext) -> Vec<ValidationIssue> {
        run_pass(&sorted_rules(), record, ctx).into_issues()
    }

    fn codes_of(issues: &[ValidationIssue]) -> Vec<IssueCode> {
        issues.iter().map(|i| i.code).collect()
    }

    // -- clean record ---------------------------------------------------------

    #[test]
    fn clean_record_has_no_issues() {
        assert!(run(&dem_with(&[]), &ctx()).is_empty());
    }

    #[test]
    fn every_dem_rule_is_registered_once() {
        let ids: Vec<RuleId> = rules().iter().map(|r| r.id()).collect();
        let expected: Vec<RuleId> = RuleId::ALL
            .iter()
            .copied()
            .filter(|r| r.file_type() == crate::fileset::FileType::Demographic)
            .collect();
        assert_eq!(ids, expected);
    }

    // -- identity -------------------------------------------------------------

    #[test]
    fn blank_pen_skips_dependent_pen_rules() {
        let issues = run(&dem_with(&[(fields::PEN, "")]), &ctx());
        let codes = codes_of(&issues);
        assert!(codes.contains(&IssueCode::StudentPenBlank));
        assert!(!codes.contains(&IssueCode::StudentPenInvalid));
        assert!(!codes.contains(&IssueCode::StudentPenNotFound));
    }

    #[test]
    fn unknown_pen_skips_registry_comparisons() {
        let ctx = ctx().with_registry_student(None);
        let issues = run(&dem_with(&[(fields::LEGAL_SURNAME, "Jones")]), &ctx);
        let codes = codes_of(&issues);
        assert!(codes.contains(&IssueCode::StudentPenNotFound));
        assert!(!codes.contains(&IssueCode::StudentSurnameMismatch));
        assert!(!codes.contains(&IssueCode::StudentBirthdateMismatch));
    }

    #[test]
    fn local_id_mismatch_is_a_warning() {
        let issues = run(&dem_with(&[(fields::LOCAL_ID, "L-999")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentLocalIdMismatch]);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    // -- names and birthdate --------------------------------------------------

    #[test]
    fn surname_compare_ignores_case() {
        assert!(run(&dem_with(&[(fields::LEGAL_SURNAME, "SMITH")]), &ctx()).is_empty());
        let issues = run(&dem_with(&[(fields::LEGAL_SURNAME, "Smyth")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentSurnameMismatch]);
    }

    #[test]
    fn impossible_birthdate_is_invalid_regardless_of_other_fields() {
        let issues = run(
            &dem_with(&[(fields::BIRTHDATE, "20230230"), (fields::PEN, "")]),
            &ctx(),
        );
        let bad: Vec<_> = issues
            .iter()
            .filter(|i| i.code == IssueCode::StudentBirthdateInvalid)
            .collect();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].severity, Severity::Error);
        assert!(bad[0].message.ends_with("20230230"));
        assert!(!codes_of(&issues).contains(&IssueCode::StudentBirthdateMismatch));
    }

    #[test]
    fn birthdate_must_match_registry() {
        let issues = run(&dem_with(&[(fields::BIRTHDATE, "20070315")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentBirthdateMismatch]);
    }

    // -- codes ----------------------------------------------------------------

    #[test]
    fn blank_citizenship_passes() {
        let issues = run(&dem_with(&[(fields::CITIZENSHIP, "")]), &ctx());
        assert!(issues.is_empty());
    }

    #[test]
    fn citizenship_x_fails() {
        let issues = run(&dem_with(&[(fields::CITIZENSHIP, "X")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentCitizenshipCodeInvalid]);
        assert_eq!(issues[0].rule, RuleId::D14);
    }

    #[test]
    fn citizenship_code_is_case_insensitive() {
        assert!(run(&dem_with(&[(fields::CITIZENSHIP, "c")]), &ctx()).is_empty());
    }

    #[test]
    fn optional_program_codes_report_each_bad_slot() {
        let issues = run(
            &dem_with(&[
                ("program_code_1", "FR"),
                ("program_code_2", "ZZ"),
                ("program_code_3", "QQ"),
            ]),
            &ctx(),
        );
        assert_eq!(
            codes_of(&issues),
            vec![
                IssueCode::StudentOptionalProgramInvalid,
                IssueCode::StudentOptionalProgramInvalid
            ]
        );
    }

    #[test]
    fn foreign_postal_code_is_not_checked() {
        let issues = run(
            &dem_with(&[(fields::POSTAL_CODE, "90210"), (fields::COUNTRY_CODE, "US")]),
            &ctx(),
        );
        assert!(issues.is_empty());
        let issues = run(&dem_with(&[(fields::POSTAL_CODE, "90210")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentPostalCodeInvalid]);
    }

    // -- programs -------------------------------------------------------------

    #[test]
    fn adult_grade_requires_adult_program_and_skips_on_bad_program() {
        let issues = run(&dem_with(&[(fields::GRADE, "AD")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentGradeProgramMismatch]);

        let issues = run(
            &dem_with(&[(fields::GRADE, "AD"), (fields::GRAD_REQUIREMENT_YEAR, "BOGUS")]),
            &ctx(),
        );
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentProgramInvalid]);
    }

    #[test]
    fn adult_program_requires_age_eighteen_on_upload_date() {
        let issues = run(
            &dem_with(&[(fields::GRADE, "AD"), (fields::GRAD_REQUIREMENT_YEAR, "1950")]),
            &ctx(),
        );
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentAdultProgramUnderage]);
    }

    #[test]
    fn closed_program_is_rejected() {
        let issues = run(&dem_with(&[(fields::GRAD_REQUIREMENT_YEAR, "1986-EN")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentProgramClosed]);
    }

    #[test]
    fn sccp_date_rules() {
        let issues = run(&dem_with(&[(fields::SCCP_COMPLETION_DATE, "20240230")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentSccpDateInvalid]);

        let issues = run(
            &dem_with(&[
                (fields::SCCP_COMPLETION_DATE, "20250101"),
                (fields::GRAD_REQUIREMENT_YEAR, "SCCP"),
            ]),
            &ctx(),
        );
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentSccpDateFuture]);

        let issues = run(&dem_with(&[(fields::SCCP_COMPLETION_DATE, "20240101")]), &ctx());
        assert_eq!(codes_of(&issues), vec![IssueCode::StudentSccpDateWrongProgram]);
    }

    // -- GRAD record ----------------------------------------------------------

    #[test]
    fn grad_record_checks_are_distinct_from_registry_checks() {
        let grad = GradStudentRecord {
            student_id: new_id(),
            program: "1986-EN".into(),
            program_completion_date: Some(date(2024, 6, 30)),
            student_status: "TER".into(),
            school_of_record: None,
            courses: Vec::new(),
        };
        let issues = run(&dem_with(&[]), &ctx().with_grad_record(Some(grad)));
        let codes = codes_of(&issues);
        assert!(codes.contains(&IssueCode::StudentStatusGradMismatch));
        assert!(!codes.contains(&IssueCode::StudentStatusMismatch));
        assert!(codes.contains(&IssueCode::StudentProgramGradMismatch));
        assert!(codes.contains(&IssueCode::StudentAlreadyGraduated));
        assert!(issues.iter().all(|i| !i.severity.is_blocking()));
    }

    // -- pending --------------------------------------------------------------

    #[test]
    fn transfer_and_school_change_rules_are_pending() {
        let pending: Vec<RuleId> = rules()
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.id())
            .collect();
        assert_eq!(pending, vec![RuleId::D32, RuleId::D33]);
    }
}

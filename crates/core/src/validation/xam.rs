//! Assessment (XAM) rules.

use super::common::{self, check, check_all, pending};
use super::context::RunContext;
use super::issue::{FieldCode, IssueCode, ValidationIssue};
use super::rule::{RuleId, ValidationRule};
use crate::student::AssessmentStudent;

type Xam = AssessmentStudent;

pub fn rules() -> Vec<Box<dyn ValidationRule<Xam>>> {
    vec![
        check(RuleId::X01, common::pen_blank),
        check(RuleId::X02, common::pen_not_found),
        check(RuleId::X03, common::local_id_mismatch),
        check(RuleId::X04, course_code_invalid),
        check(RuleId::X05, course_not_examinable),
        check(RuleId::X06, session_invalid),
        check_all(RuleId::X07, school_percent_invalid),
        check(RuleId::X08, best_school_percent_invalid),
        check(RuleId::X09, exam_percent_invalid),
        check(RuleId::X10, final_percent_invalid),
        check(RuleId::X11, final_letter_invalid),
        check(RuleId::X12, final_grade_mismatch),
        check(RuleId::X13, special_case_invalid),
        check(RuleId::X14, course_status_invalid),
        check(RuleId::X15, exam_already_written),
        pending(RuleId::X16, "e-exam flag values and when they apply"),
    ]
}

fn course_code_invalid(rule: RuleId, r: &Xam, ctx: &RunContext) -> Option<ValidationIssue> {
    common::course_code_issue(rule, r.course_code.as_deref(), r.course_level.as_deref(), ctx)
}

fn course_not_examinable(rule: RuleId, r: &Xam, ctx: &RunContext) -> Option<ValidationIssue> {
    let code = r.course_code.as_deref()?;
    let course = ctx.course(code, r.course_level.as_deref())?;
    (!course.examinable).then(|| {
        ValidationIssue::echoing(rule, FieldCode::CourseCode, IssueCode::CourseNotExaminable, code)
    })
}

fn session_invalid(rule: RuleId, r: &Xam, _: &RunContext) -> Option<ValidationIssue> {
    common::session_issue(rule, r.course_year.as_deref(), r.course_month.as_deref())
}

fn school_percent_invalid(rule: RuleId, r: &Xam, _: &RunContext) -> Vec<ValidationIssue> {
    [r.interim_school_percent.as_deref(), r.final_school_percent.as_deref()]
        .into_iter()
        .filter_map(|value| {
            common::percent_issue(
                rule,
                FieldCode::SchoolPercent,
                IssueCode::SchoolPercentInvalid,
                value,
            )
        })
        .collect()
}

fn best_school_percent_invalid(rule: RuleId, r: &Xam, _: &RunContext) -> Option<ValidationIssue> {
    common::percent_issue(
        rule,
        FieldCode::BestSchoolPercent,
        IssueCode::BestSchoolPercentInvalid,
        r.best_school_percent.as_deref(),
    )
}

fn exam_percent_invalid(rule: RuleId, r: &Xam, _: &RunContext) -> Option<ValidationIssue> {
    common::percent_issue(
        rule,
        FieldCode::ExamPercent,
        IssueCode::ExamPercentInvalid,
        r.exam_percent.as_deref(),
    )
}

fn final_percent_invalid(rule: RuleId, r: &Xam, _: &RunContext) -> Option<ValidationIssue> {
    common::percent_issue(
        rule,
        FieldCode::FinalPercent,
        IssueCode::FinalPercentInvalid,
        r.final_percent.as_deref(),
    )
}

fn final_letter_invalid(rule: RuleId, r: &Xam, ctx: &RunContext) -> Option<ValidationIssue> {
    common::letter_grade_issue(
        rule,
        FieldCode::FinalLetterGrade,
        IssueCode::FinalLetterGradeInvalid,
        r.final_letter_grade.as_deref(),
        ctx,
    )
}

fn final_grade_mismatch(rule: RuleId, r: &Xam, ctx: &RunContext) -> Option<ValidationIssue> {
    common::grade_mismatch_issue(
        rule,
        FieldCode::FinalPercent,
        IssueCode::FinalGradeMismatch,
        r.final_percent.as_deref(),
        r.final_letter_grade.as_deref(),
        ctx,
    )
}

fn special_case_invalid(rule: RuleId, r: &Xam, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.provincial_special_case.as_deref()?;
    (!ctx.codes.has_special_case(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::ProvincialSpecialCase,
            IssueCode::SpecialCaseInvalid,
            submitted,
        )
    })
}

fn course_status_invalid(rule: RuleId, r: &Xam, _: &RunContext) -> Option<ValidationIssue> {
    common::course_status_issue(rule, r.course_status.as_deref())
}

fn exam_already_written(rule: RuleId, r: &Xam, ctx: &RunContext) -> Option<ValidationIssue> {
    let code = r.course_code.as_deref()?;
    let session = r.session()?;
    ctx.course_history
        .iter()
        .any(|c| c.has_exam && c.session == session && c.is_course(code, r.course_level.as_deref()))
        .then(|| {
            ValidationIssue::echoing(
                rule,
                FieldCode::CourseSession,
                IssueCode::ExamAlreadyWritten,
                &session,
            )
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::gateway::{CodeTables, CourseRecord, LetterGrade, RegistryStudent, StudentCourseRecord};
    use crate::student::{fields, FieldMap};
    use crate::types::new_id;
    use crate::validation::common::run_pass;
    use crate::validation::issue::Severity;

    const PEN: &str = "120164447";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ctx() -> RunContext {
        let codes = CodeTables {
            letter_grades: vec![LetterGrade {
                grade: "B".into(),
                percent_low: Some(73),
                percent_high: Some(85),
            }],
            provincial_special_case_codes: vec!["A".into(), "E".into()],
            ..Default::default()
        };
        let course = |code: &str, level: &str, examinable: bool| CourseRecord {
            course_code: code.into(),
            course_level: Some(level.into()),
            start_date: None,
            completion_end_date: None,
            allowed_credits: vec![4],
            examinable,
            locally_developed: false,
        };
        RunContext::new(date(2024, 9, 30), Arc::new(codes))
            .with_registry_student(Some(RegistryStudent {
                student_id: new_id(),
                pen: PEN.into(),
                legal_surname: "SMITH".into(),
                legal_given_name: None,
                legal_middle_names: None,
                birthdate: date(2007, 3, 14),
                local_id: Some("L-1".into()),
                status_code: "A".into(),
                mincode: None,
            }))
            .with_course(course("LTE", "10", true))
            .with_course(course("ART", "10", false))
    }

    fn xam_with(overrides: &[(&str, &str)]) -> Xam {
        let mut map: FieldMap = [
            (fields::PEN, PEN),
            (fields::COURSE_CODE, "LTE"),
            (fields::COURSE_LEVEL, "10"),
            (fields::COURSE_YEAR, "2024"),
            (fields::COURSE_MONTH, "06"),
            (fields::FINAL_SCHOOL_PERCENT, "78"),
            (fields::EXAM_PERCENT, "82"),
            (fields::FINAL_PERCENT, "80"),
            (fields::FINAL_LETTER_GRADE, "B"),
            (fields::COURSE_STATUS, "A"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            map.insert(k.to_string(), v.to_string());
        }
        Xam::from_fields(&map)
    }

    fn run(record: &Xam, ctx: &RunContext) -> Vec<ValidationIssue> {
        let mut rules = rules();
        rules.sort_by_key(|r| r.id().priority());
        run_pass(&rules, record, ctx).into_issues()
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<IssueCode> {
        issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn clean_assessment_has_no_issues() {
        assert!(run(&xam_with(&[]), &ctx()).is_empty());
    }

    #[test]
    fn non_examinable_course() {
        let issues = run(&xam_with(&[(fields::COURSE_CODE, "ART")]), &ctx());
        assert_eq!(codes(&issues), vec![IssueCode::CourseNotExaminable]);
    }

    #[test]
    fn both_school_percents_are_checked() {
        let issues = run(
            &xam_with(&[
                (fields::INTERIM_SCHOOL_PERCENT, "abc"),
                (fields::FINAL_SCHOOL_PERCENT, "101"),
            ]),
            &ctx(),
        );
        assert_eq!(
            codes(&issues),
            vec![IssueCode::SchoolPercentInvalid, IssueCode::SchoolPercentInvalid]
        );
    }

    #[test]
    fn special_case_code() {
        let issues = run(&xam_with(&[(fields::PROVINCIAL_SPECIAL_CASE, "e")]), &ctx());
        assert!(issues.is_empty());
        let issues = run(&xam_with(&[(fields::PROVINCIAL_SPECIAL_CASE, "Z")]), &ctx());
        assert_eq!(codes(&issues), vec![IssueCode::SpecialCaseInvalid]);
    }

    #[test]
    fn exam_already_written_warns_and_skips_when_course_unknown() {
        let ctx = ctx().with_course_history(vec![StudentCourseRecord {
            course_code: "LTE".into(),
            course_level: Some("10".into()),
            session: "202406".into(),
            has_exam: true,
            final_percent: Some(80),
            final_letter_grade: Some("B".into()),
        }]);
        let issues = run(&xam_with(&[]), &ctx);
        assert_eq!(codes(&issues), vec![IssueCode::ExamAlreadyWritten]);
        assert_eq!(issues[0].severity, Severity::Warning);

        let issues = run(&xam_with(&[(fields::COURSE_LEVEL, "12")]), &ctx);
        assert_eq!(codes(&issues), vec![IssueCode::CourseCodeInvalid]);
    }

    #[test]
    fn local_id_mismatch_does_not_block() {
        let issues = run(&xam_with(&[(fields::LOCAL_ID, "OTHER")]), &ctx());
        assert_eq!(codes(&issues), vec![IssueCode::StudentLocalIdMismatch]);
        assert!(!issues[0].severity.is_blocking());
    }

    #[test]
    fn e_exam_rule_is_pending() {
        let pending: Vec<RuleId> = rules()
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.id())
            .collect();
        assert_eq!(pending, vec![RuleId::X16]);
    }
}

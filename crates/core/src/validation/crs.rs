//! Course (CRS) rules.

use super::common::{self, check, pending};
use super::context::RunContext;
use super::format::parse_credits;
use super::issue::{FieldCode, IssueCode, ValidationIssue};
use super::rule::{RuleId, ValidationRule};
use crate::gateway::StudentCourseRecord;
use crate::student::CourseStudent;

/// Graduation requirement codes that only count toward the 1996 program.
const FINE_ARTS_APPLIED_SKILLS: &[&str] = &["F", "A", "FA"];
const PROGRAM_1996_PREFIX: &str = "1996";

type Crs = CourseStudent;

pub fn rules() -> Vec<Box<dyn ValidationRule<Crs>>> {
    vec![
        check(RuleId::C01, common::pen_blank),
        check(RuleId::C02, common::pen_not_found),
        check(RuleId::C03, common::local_id_mismatch),
        check(RuleId::C04, course_code_invalid),
        check(RuleId::C05, session_invalid),
        check(RuleId::C06, session_future),
        check(RuleId::C07, course_closed),
        check(RuleId::C08, interim_percent_invalid),
        check(RuleId::C09, interim_letter_invalid),
        check(RuleId::C10, interim_grade_mismatch),
        check(RuleId::C11, final_percent_invalid),
        check(RuleId::C12, final_letter_invalid),
        check(RuleId::C13, final_grade_mismatch),
        check(RuleId::C14, course_status_invalid),
        check(RuleId::C15, withdrawn_with_mark),
        check(RuleId::C16, credits_invalid),
        check(RuleId::C17, credits_not_offered),
        check(RuleId::C18, equivalency_invalid),
        check(RuleId::C19, graduation_requirement_invalid),
        check(RuleId::C20, graduation_requirement_program),
        check(RuleId::C21, related_course_invalid),
        check(RuleId::C22, description_missing),
        check(RuleId::C23, exam_exists_in_history),
        check(RuleId::C24, exam_exists_in_grad),
        pending(RuleId::C25, "Q-coded course reported for a student not on the adult program"),
    ]
}

fn course_code_invalid(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    common::course_code_issue(rule, r.course_code.as_deref(), r.course_level.as_deref(), ctx)
}

fn session_invalid(rule: RuleId, r: &Crs, _: &RunContext) -> Option<ValidationIssue> {
    common::session_issue(rule, r.course_year.as_deref(), r.course_month.as_deref())
}

fn session_future(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let start = common::session_start(r.course_year.as_deref(), r.course_month.as_deref())?;
    common::session_in_future(start, ctx.upload_date).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::CourseSession,
            IssueCode::CourseSessionFuture,
            &r.session().unwrap_or_default(),
        )
    })
}

fn course_closed(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let course = ctx.course(r.course_code.as_deref()?, r.course_level.as_deref())?;
    let start = common::session_start(r.course_year.as_deref(), r.course_month.as_deref())?;
    (!course.open_on(start)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::CourseSession,
            IssueCode::CourseClosed,
            &r.session().unwrap_or_default(),
        )
    })
}

fn interim_percent_invalid(rule: RuleId, r: &Crs, _: &RunContext) -> Option<ValidationIssue> {
    common::percent_issue(
        rule,
        FieldCode::InterimPercent,
        IssueCode::InterimPercentInvalid,
        r.interim_percent.as_deref(),
    )
}

fn interim_letter_invalid(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    common::letter_grade_issue(
        rule,
        FieldCode::InterimLetterGrade,
        IssueCode::InterimLetterGradeInvalid,
        r.interim_letter_grade.as_deref(),
        ctx,
    )
}

fn interim_grade_mismatch(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    common::grade_mismatch_issue(
        rule,
        FieldCode::InterimPercent,
        IssueCode::InterimGradeMismatch,
        r.interim_percent.as_deref(),
        r.interim_letter_grade.as_deref(),
        ctx,
    )
}

fn final_percent_invalid(rule: RuleId, r: &Crs, _: &RunContext) -> Option<ValidationIssue> {
    common::percent_issue(
        rule,
        FieldCode::FinalPercent,
        IssueCode::FinalPercentInvalid,
        r.final_percent.as_deref(),
    )
}

fn final_letter_invalid(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    common::letter_grade_issue(
        rule,
        FieldCode::FinalLetterGrade,
        IssueCode::FinalLetterGradeInvalid,
        r.final_letter_grade.as_deref(),
        ctx,
    )
}

fn final_grade_mismatch(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    common::grade_mismatch_issue(
        rule,
        FieldCode::FinalPercent,
        IssueCode::FinalGradeMismatch,
        r.final_percent.as_deref(),
        r.final_letter_grade.as_deref(),
        ctx,
    )
}

fn course_status_invalid(rule: RuleId, r: &Crs, _: &RunContext) -> Option<ValidationIssue> {
    common::course_status_issue(rule, r.course_status.as_deref())
}

fn withdrawn_with_mark(rule: RuleId, r: &Crs, _: &RunContext) -> Option<ValidationIssue> {
    let withdrawn = r
        .course_status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("W"));
    let has_mark = r.final_percent.is_some() || r.final_letter_grade.is_some();
    (withdrawn && has_mark).then(|| {
        ValidationIssue::new(rule, FieldCode::CourseStatus, IssueCode::WithdrawnCourseHasMark)
    })
}

fn credits_invalid(rule: RuleId, r: &Crs, _: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.number_of_credits.as_deref().unwrap_or("");
    parse_credits(submitted).is_none().then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::NumberOfCredits,
            IssueCode::CreditsInvalid,
            submitted,
        )
    })
}

/// An empty credit list in the catalogue means any credit value is accepted.
fn credits_not_offered(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let course = ctx.course(r.course_code.as_deref()?, r.course_level.as_deref())?;
    let credits = parse_credits(r.number_of_credits.as_deref()?)?;
    let offered = course.allowed_credits.is_empty() || course.allowed_credits.contains(&credits);
    (!offered).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::NumberOfCredits,
            IssueCode::CreditsNotOffered,
            &credits.to_string(),
        )
    })
}

fn equivalency_invalid(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.equivalency_or_challenge.as_deref()?;
    (!ctx.codes.has_equivalency(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::EquivalencyOrChallenge,
            IssueCode::EquivalencyChallengeInvalid,
            submitted,
        )
    })
}

fn graduation_requirement_invalid(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.course_graduation_requirement.as_deref()?;
    (!ctx.codes.has_graduation_requirement(submitted)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::CourseGraduationRequirement,
            IssueCode::GraduationRequirementInvalid,
            submitted,
        )
    })
}

/// Needs the same-fileset DEM record to know the student's program.
fn graduation_requirement_program(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.course_graduation_requirement.as_deref()?;
    let program = ctx.reported_program()?;
    let fine_arts = FINE_ARTS_APPLIED_SKILLS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(submitted));
    (fine_arts && !program.trim().starts_with(PROGRAM_1996_PREFIX)).then(|| {
        ValidationIssue::echoing(
            rule,
            FieldCode::CourseGraduationRequirement,
            IssueCode::GraduationRequirementProgram,
            submitted,
        )
    })
}

fn related_course_invalid(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let related = r.related_course.as_deref()?;
    ctx.course(related, r.related_level.as_deref()).is_none().then(|| {
        let submitted = format!("{} {}", related, r.related_level.as_deref().unwrap_or(""));
        ValidationIssue::echoing(
            rule,
            FieldCode::RelatedCourse,
            IssueCode::RelatedCourseInvalid,
            submitted.trim(),
        )
    })
}

fn description_missing(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let course = ctx.course(r.course_code.as_deref()?, r.course_level.as_deref())?;
    (course.locally_developed && r.course_description.is_none()).then(|| {
        ValidationIssue::new(rule, FieldCode::CourseDescription, IssueCode::CourseDescriptionMissing)
    })
}

fn examined_in(history: &[StudentCourseRecord], r: &Crs) -> bool {
    let (Some(code), Some(session)) = (r.course_code.as_deref(), r.session()) else {
        return false;
    };
    history
        .iter()
        .any(|c| c.has_exam && c.session == session && c.is_course(code, r.course_level.as_deref()))
}

fn exam_exists_in_history(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    examined_in(&ctx.course_history, r).then(|| {
        ValidationIssue::new(rule, FieldCode::CourseCode, IssueCode::CourseExamExists)
    })
}

fn exam_exists_in_grad(rule: RuleId, r: &Crs, ctx: &RunContext) -> Option<ValidationIssue> {
    let grad = ctx.grad_record.as_ref()?;
    examined_in(&grad.courses, r).then(|| {
        ValidationIssue::new(rule, FieldCode::CourseCode, IssueCode::CourseExamExistsGrad)
    })
}

//! Building blocks shared by the DEM, CRS and XAM rule sets.

use chrono::{Datelike, NaiveDate};

use super::context::RunContext;
use super::format::{parse_percent, pen_check_digit_valid, same_text, MIN_SESSION_YEAR};
use super::issue::{FieldCode, IssueCode, ValidationIssue};
use super::rule::{IssueLog, PendingRule, RuleId, ValidationRule};
use crate::student::StudentRecord;

/// Single-issue check.
pub type CheckOne<R> = fn(RuleId, &R, &RunContext) -> Option<ValidationIssue>;
/// Check that may report one issue per offending value.
pub type CheckMany<R> = fn(RuleId, &R, &RunContext) -> Vec<ValidationIssue>;

enum Check<R> {
    One(CheckOne<R>),
    Many(CheckMany<R>),
}

/// A rule backed by a plain function. Dependencies come from the rule table.
pub struct CheckRule<R> {
    id: RuleId,
    check: Check<R>,
}

impl<R> ValidationRule<R> for CheckRule<R> {
    fn id(&self) -> RuleId {
        self.id
    }

    fn evaluate(&self, record: &R, ctx: &RunContext) -> Vec<ValidationIssue> {
        match self.check {
            Check::One(f) => f(self.id, record, ctx).into_iter().collect(),
            Check::Many(f) => f(self.id, record, ctx),
        }
    }
}

pub fn check<R: 'static>(id: RuleId, f: CheckOne<R>) -> Box<dyn ValidationRule<R>> {
    Box::new(CheckRule {
        id,
        check: Check::One(f),
    })
}

pub fn check_all<R: 'static>(id: RuleId, f: CheckMany<R>) -> Box<dyn ValidationRule<R>> {
    Box::new(CheckRule {
        id,
        check: Check::Many(f),
    })
}

pub fn pending<R: 'static>(id: RuleId, description: &'static str) -> Box<dyn ValidationRule<R>> {
    Box::new(PendingRule::new(id, description))
}

/// Run `rules` in order, honouring dependency skips. Used by the engine and
/// by rule-level tests.
pub fn run_pass<R>(rules: &[Box<dyn ValidationRule<R>>], record: &R, ctx: &RunContext) -> IssueLog {
    let mut log = IssueLog::default();
    for rule in rules {
        if rule.should_execute(record, &log) {
            let found = rule.evaluate(record, ctx);
            log.record(rule.id(), found);
        }
    }
    log
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

pub fn pen_blank<R: StudentRecord>(rule: RuleId, r: &R, _: &RunContext) -> Option<ValidationIssue> {
    r.pen()
        .is_none()
        .then(|| ValidationIssue::new(rule, FieldCode::Pen, IssueCode::StudentPenBlank))
}

pub fn pen_check_digit<R: StudentRecord>(rule: RuleId, r: &R, _: &RunContext) -> Option<ValidationIssue> {
    let pen = r.pen()?;
    (!pen_check_digit_valid(pen))
        .then(|| ValidationIssue::echoing(rule, FieldCode::Pen, IssueCode::StudentPenInvalid, pen))
}

pub fn pen_not_found<R: StudentRecord>(rule: RuleId, r: &R, ctx: &RunContext) -> Option<ValidationIssue> {
    let pen = r.pen()?;
    let found = ctx
        .registry_student
        .as_ref()
        .is_some_and(|s| s.pen.trim() == pen);
    (!found).then(|| ValidationIssue::echoing(rule, FieldCode::Pen, IssueCode::StudentPenNotFound, pen))
}

pub fn local_id_mismatch<R: StudentRecord>(rule: RuleId, r: &R, ctx: &RunContext) -> Option<ValidationIssue> {
    let submitted = r.header().local_id.as_deref()?;
    let registry = ctx.registry_student.as_ref()?.local_id.as_deref()?;
    (!same_text(Some(submitted), Some(registry))).then(|| {
        ValidationIssue::echoing(rule, FieldCode::LocalId, IssueCode::StudentLocalIdMismatch, submitted)
    })
}

// ---------------------------------------------------------------------------
// Course fields (CRS + XAM)
// ---------------------------------------------------------------------------

/// First day of the session, when year and month form a real month no
/// earlier than the registry's first session year.
pub fn session_start(year: Option<&str>, month: Option<&str>) -> Option<NaiveDate> {
    let year: i32 = year?.trim().parse().ok()?;
    let month: u32 = month?.trim().parse().ok()?;
    if year < MIN_SESSION_YEAR {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// A session more than a year after the upload cannot have been written yet.
pub fn session_in_future(start: NaiveDate, upload_date: NaiveDate) -> bool {
    let limit = NaiveDate::from_ymd_opt(upload_date.year() + 1, upload_date.month(), 1)
        .unwrap_or(upload_date);
    start > limit
}

pub fn session_issue(
    rule: RuleId,
    year: Option<&str>,
    month: Option<&str>,
) -> Option<ValidationIssue> {
    if session_start(year, month).is_some() {
        return None;
    }
    let submitted = format!("{}{}", year.unwrap_or(""), month.unwrap_or(""));
    Some(ValidationIssue::echoing(
        rule,
        FieldCode::CourseSession,
        IssueCode::CourseSessionInvalid,
        &submitted,
    ))
}

pub fn course_code_issue(
    rule: RuleId,
    code: Option<&str>,
    level: Option<&str>,
    ctx: &RunContext,
) -> Option<ValidationIssue> {
    match code {
        Some(c) if ctx.course(c, level).is_some() => None,
        _ => {
            let submitted = format!("{} {}", code.unwrap_or(""), level.unwrap_or(""));
            Some(ValidationIssue::echoing(
                rule,
                FieldCode::CourseCode,
                IssueCode::CourseCodeInvalid,
                submitted.trim(),
            ))
        }
    }
}

/// Present-but-malformed percentage.
pub fn percent_issue(
    rule: RuleId,
    field: FieldCode,
    code: IssueCode,
    value: Option<&str>,
) -> Option<ValidationIssue> {
    let value = value?;
    parse_percent(value)
        .is_none()
        .then(|| ValidationIssue::echoing(rule, field, code, value))
}

/// Present letter grade missing from the code table.
pub fn letter_grade_issue(
    rule: RuleId,
    field: FieldCode,
    code: IssueCode,
    value: Option<&str>,
    ctx: &RunContext,
) -> Option<ValidationIssue> {
    let value = value?;
    ctx.codes
        .letter_grade(value)
        .is_none()
        .then(|| ValidationIssue::echoing(rule, field, code, value))
}

/// Percentage outside the band of the reported letter grade. Grades without
/// a band (withdrawn, requirement met) must not carry a percentage.
pub fn grade_mismatch_issue(
    rule: RuleId,
    field: FieldCode,
    code: IssueCode,
    percent: Option<&str>,
    letter: Option<&str>,
    ctx: &RunContext,
) -> Option<ValidationIssue> {
    let percent = parse_percent(percent?)?;
    let grade = ctx.codes.letter_grade(letter?)?;
    if grade.has_band() && grade.covers(percent) {
        return None;
    }
    if !grade.has_band() && percent == 0 {
        return None;
    }
    Some(ValidationIssue::echoing(
        rule,
        field,
        code,
        &format!("{percent} {}", grade.grade),
    ))
}

/// `A` active or `W` withdrawn.
pub fn course_status_issue(rule: RuleId, status: Option<&str>) -> Option<ValidationIssue> {
    match status {
        Some(s) if s.eq_ignore_ascii_case("A") || s.eq_ignore_ascii_case("W") => None,
        other => Some(ValidationIssue::echoing(
            rule,
            FieldCode::CourseStatus,
            IssueCode::CourseStatusInvalid,
            other.unwrap_or(""),
        )),
    }
}

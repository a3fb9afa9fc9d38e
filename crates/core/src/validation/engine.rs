//! Priority-ordered rule pass per file type.

use super::common::run_pass;
use super::context::RunContext;
use super::issue::ValidationIssue;
use super::rule::{RuleId, ValidationRule};
use super::{crs, dem, xam};
use crate::student::{AnyStudent, AssessmentStudent, CourseStudent, DemographicStudent};

/// Registry of rules for one record type, sorted once by declared priority.
pub struct RuleEngine<R> {
    rules: Vec<Box<dyn ValidationRule<R>>>,
}

impl<R> RuleEngine<R> {
    pub fn new(mut rules: Vec<Box<dyn ValidationRule<R>>>) -> Self {
        // Stable sort keeps registration order for equal priorities.
        rules.sort_by_key(|r| r.id().priority());
        Self { rules }
    }

    /// Single linear pass. Every rule whose dependencies stayed clear runs;
    /// there is no early exit.
    pub fn validate(&self, record: &R, ctx: &RunContext) -> Vec<ValidationIssue> {
        run_pass(&self.rules, record, ctx).into_issues()
    }

    /// Rule ids in execution order.
    pub fn order(&self) -> Vec<RuleId> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn pending_rules(&self) -> Vec<RuleId> {
        self.rules
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.id())
            .collect()
    }
}

/// The three engines, built once at startup.
pub struct RuleEngines {
    pub demographic: RuleEngine<DemographicStudent>,
    pub course: RuleEngine<CourseStudent>,
    pub assessment: RuleEngine<AssessmentStudent>,
}

impl RuleEngines {
    pub fn standard() -> Self {
        Self {
            demographic: RuleEngine::new(dem::rules()),
            course: RuleEngine::new(crs::rules()),
            assessment: RuleEngine::new(xam::rules()),
        }
    }

    pub fn validate(&self, record: &AnyStudent, ctx: &RunContext) -> Vec<ValidationIssue> {
        match record {
            AnyStudent::Demographic(r) => self.demographic.validate(r, ctx),
            AnyStudent::Course(r) => self.course.validate(r, ctx),
            AnyStudent::Assessment(r) => self.assessment.validate(r, ctx),
        }
    }

    pub fn pending_rules(&self) -> Vec<RuleId> {
        let mut all = self.demographic.pending_rules();
        all.extend(self.course.pending_rules());
        all.extend(self.assessment.pending_rules());
        all
    }
}

impl Default for RuleEngines {
    fn default() -> Self {
        Self::standard()
    }
}

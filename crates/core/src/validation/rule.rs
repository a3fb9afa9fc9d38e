//! Rule identities, the dependency table, and the rule trait.
//!
//! Every rule is named by a [`RuleId`]. The table below declares, per rule,
//! the file type it belongs to, its execution priority (lower runs first)
//! and the rules it depends on. A rule whose dependency already produced an
//! issue in the current pass is skipped.

use std::collections::HashSet;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::context::RunContext;
use super::issue::ValidationIssue;
use crate::fileset::FileType;

macro_rules! define_rule_ids {
    (
        $( $variant:ident => ($file:ident, $priority:expr, [$($dep:ident),* $(,)?]) ),+ $(,)?
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum RuleId {
            $( $variant ),+
        }

        impl RuleId {
            pub const ALL: &'static [RuleId] = &[ $( RuleId::$variant ),+ ];

            pub fn code(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant) ),+
                }
            }

            pub fn file_type(self) -> FileType {
                match self {
                    $( Self::$variant => FileType::$file ),+
                }
            }

            /// Declared execution priority; lower runs first.
            pub fn priority(self) -> u16 {
                match self {
                    $( Self::$variant => $priority ),+
                }
            }

            /// Rules that must not have fired for this one to run.
            pub fn dependencies(self) -> &'static [RuleId] {
                match self {
                    $( Self::$variant => &[ $( RuleId::$dep ),* ] ),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|r| r.code() == s)
            }
        }
    };
}

define_rule_ids! {
    // DEM
    D01 => (Demographic, 10, []),
    D02 => (Demographic, 20, [D01]),
    D03 => (Demographic, 30, [D01, D02]),
    D04 => (Demographic, 40, [D03]),
    D05 => (Demographic, 50, []),
    D06 => (Demographic, 60, [D03, D05]),
    D07 => (Demographic, 70, []),
    D08 => (Demographic, 80, [D03, D07]),
    D09 => (Demographic, 90, [D03]),
    D10 => (Demographic, 100, [D03]),
    D11 => (Demographic, 110, []),
    D12 => (Demographic, 120, [D03, D11]),
    D13 => (Demographic, 130, [D03, D11]),
    D14 => (Demographic, 140, []),
    D15 => (Demographic, 150, []),
    D16 => (Demographic, 225, [D15, D22]),
    D17 => (Demographic, 170, []),
    D18 => (Demographic, 180, []),
    D19 => (Demographic, 190, []),
    D20 => (Demographic, 200, []),
    D21 => (Demographic, 210, []),
    D22 => (Demographic, 220, []),
    D23 => (Demographic, 230, [D22]),
    D24 => (Demographic, 240, [D07, D22]),
    D25 => (Demographic, 250, []),
    D26 => (Demographic, 260, [D25]),
    D27 => (Demographic, 270, [D22, D25]),
    D28 => (Demographic, 280, []),
    D29 => (Demographic, 290, []),
    D30 => (Demographic, 300, [D03, D22]),
    D31 => (Demographic, 310, [D03]),
    D32 => (Demographic, 320, [D03]),
    D33 => (Demographic, 330, [D03]),

    // CRS
    C01 => (Course, 10, []),
    C02 => (Course, 20, [C01]),
    C03 => (Course, 30, [C02]),
    C04 => (Course, 40, []),
    C05 => (Course, 50, []),
    C06 => (Course, 60, [C05]),
    C07 => (Course, 70, [C04, C05]),
    C08 => (Course, 80, []),
    C09 => (Course, 90, []),
    C10 => (Course, 100, [C08, C09]),
    C11 => (Course, 110, []),
    C12 => (Course, 120, []),
    C13 => (Course, 130, [C11, C12]),
    C14 => (Course, 140, []),
    C15 => (Course, 150, [C14]),
    C16 => (Course, 160, []),
    C17 => (Course, 170, [C04, C16]),
    C18 => (Course, 180, []),
    C19 => (Course, 190, []),
    C20 => (Course, 200, [C19]),
    C21 => (Course, 210, []),
    C22 => (Course, 220, [C04]),
    C23 => (Course, 230, [C02, C04, C05]),
    C24 => (Course, 240, [C02, C04, C05]),
    C25 => (Course, 250, [C04]),

    // XAM
    X01 => (Assessment, 10, []),
    X02 => (Assessment, 20, [X01]),
    X03 => (Assessment, 30, [X02]),
    X04 => (Assessment, 40, []),
    X05 => (Assessment, 50, [X04]),
    X06 => (Assessment, 60, []),
    X07 => (Assessment, 70, []),
    X08 => (Assessment, 80, []),
    X09 => (Assessment, 90, []),
    X10 => (Assessment, 100, []),
    X11 => (Assessment, 110, []),
    X12 => (Assessment, 120, [X10, X11]),
    X13 => (Assessment, 130, []),
    X14 => (Assessment, 140, []),
    X15 => (Assessment, 150, [X02, X04, X06]),
    X16 => (Assessment, 160, []),
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ── Issue log ────────────────────────────────────────────────────────

/// Issues accumulated during one pass over one record, plus the set of
/// rules that produced at least one of them.
#[derive(Debug, Default)]
pub struct IssueLog {
    issues: Vec<ValidationIssue>,
    fired: HashSet<RuleId>,
}

impl IssueLog {
    pub fn record(&mut self, rule: RuleId, found: Vec<ValidationIssue>) {
        if !found.is_empty() {
            self.fired.insert(rule);
            self.issues.extend(found);
        }
    }

    pub fn has_fired(&self, rule: RuleId) -> bool {
        self.fired.contains(&rule)
    }

    /// `true` when none of `rule`'s dependencies fired.
    pub fn dependencies_clear(&self, rule: RuleId) -> bool {
        rule.dependencies().iter().all(|dep| !self.has_fired(*dep))
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }
}

// ── Rule trait ───────────────────────────────────────────────────────

/// One business rule applied to records of type `R`.
pub trait ValidationRule<R>: Send + Sync {
    fn id(&self) -> RuleId;

    /// Skip when any declared dependency already fired.
    fn should_execute(&self, _record: &R, issues: &IssueLog) -> bool {
        issues.dependencies_clear(self.id())
    }

    fn evaluate(&self, record: &R, ctx: &RunContext) -> Vec<ValidationIssue>;

    /// Placeholder whose predicate has not been defined yet.
    fn is_pending(&self) -> bool {
        false
    }
}

/// A registered rule whose predicate is not yet defined. Never fires.
pub struct PendingRule<R> {
    id: RuleId,
    pub description: &'static str,
    _record: PhantomData<fn(&R)>,
}

impl<R> PendingRule<R> {
    pub fn new(id: RuleId, description: &'static str) -> Self {
        Self {
            id,
            description,
            _record: PhantomData,
        }
    }
}

impl<R> ValidationRule<R> for PendingRule<R> {
    fn id(&self) -> RuleId {
        self.id
    }

    fn evaluate(&self, _record: &R, _ctx: &RunContext) -> Vec<ValidationIssue> {
        Vec::new()
    }

    fn is_pending(&self) -> bool {
        true
    }
}

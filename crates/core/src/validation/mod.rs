//! Student record validation: rule catalogue, dependency table and engine.
//!
//! Rules are plain values registered per file type and sorted once by their
//! declared priority. A pass runs every rule whose dependencies produced no
//! issue, accumulating issues in order.

pub mod common;
pub mod context;
pub mod crs;
pub mod dem;
pub mod engine;
pub mod format;
pub mod issue;
pub mod rule;
pub mod xam;

pub use context::RunContext;
pub use engine::{RuleEngine, RuleEngines};
pub use issue::{FieldCode, IssueCode, Severity, ValidationIssue};
pub use rule::{IssueLog, PendingRule, RuleId, ValidationRule};

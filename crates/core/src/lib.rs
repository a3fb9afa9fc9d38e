//! Pure domain logic for GRAD data collection.
//!
//! Everything in this crate is free of database and network access: the
//! fileset and student models, the reconcile planner, the validation rule
//! engine, the saga state machine, finalization summaries, and the traits
//! the outer crates implement for persistence and registry lookups.

pub mod error;
pub mod finalize;
pub mod fileset;
pub mod gateway;
pub mod reconcile;
pub mod retry;
pub mod saga;
pub mod store;
pub mod student;
pub mod types;
pub mod validation;

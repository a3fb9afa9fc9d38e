//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async data access.
//! Reads accept `&PgPool` as the first argument; writes that must commit
//! together take the open transaction instead.

pub mod error_student_repo;
pub mod fileset_repo;
pub mod reporting_period_repo;
pub mod saga_repo;
pub mod student_repo;

pub use error_student_repo::ErrorStudentRepo;
pub use fileset_repo::FilesetRepo;
pub use reporting_period_repo::ReportingPeriodRepo;
pub use saga_repo::SagaRepo;
pub use student_repo::StudentRepo;

/// Open PostgreSQL transaction.
pub type PgTx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

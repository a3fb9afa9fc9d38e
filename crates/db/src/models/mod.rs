//! Row structs and their conversions into the core domain types.
//!
//! Each submodule contains:
//! - A `FromRow` entity struct matching the database row
//! - A `TryFrom` into the matching `gdc_core` type; text columns that fail
//!   to parse surface as `StoreError::Corrupt`

pub mod error_student;
pub mod fileset;
pub mod reporting_period;
pub mod saga;
pub mod student;

use gdc_core::store::StoreError;

/// Parse a text status column, naming the column on failure.
pub(crate) fn parse_column<T>(
    column: &'static str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    parse(value).ok_or_else(|| StoreError::Corrupt(format!("{column} has unknown value '{value}'")))
}

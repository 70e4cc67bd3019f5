//! Version ordering for primary keys.
//!
//! `decide` is pure: it returns the version that should be stored and leaves committing it
//! to the index.

pub mod columns;
pub mod sealed;
pub mod value;

pub use columns::{ComparisonColumns, Decision};
pub use sealed::{decide_sealed, SealedValues};
pub use value::{ComparableValue, ComparisonValue, ValueType};

use thiserror::Error;

/// Which ordering rule applies to a proposed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonMode {
    /// Real-time records: the first non-null column decides.
    #[default]
    PerColumn,
    /// Records of a sealed segment: per-column dominance across all configured columns.
    SealedAggregate,
}

/// Errors raised while ordering versions. Both are configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComparisonError {
    #[error(
        "comparison column '{column}' holds {stored} in the stored version but {proposed} in the proposed version"
    )]
    TypeMismatch {
        column: String,
        stored: ValueType,
        proposed: ValueType,
    },
    #[error("sealed comparison expects {expected} values but found {found}")]
    ArityMismatch { expected: usize, found: usize },
}

/// Applies the ordering rule selected by `mode`.
pub fn decide(
    mode: ComparisonMode,
    proposed: &ComparisonColumns,
    stored: &ComparisonColumns,
    columns: &[String],
) -> Result<Decision, ComparisonError> {
    match mode {
        ComparisonMode::PerColumn => proposed.decide(stored),
        ComparisonMode::SealedAggregate => decide_sealed(proposed, stored, columns),
    }
}

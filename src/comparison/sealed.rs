use super::columns::{compare_values, ComparisonColumns, Decision};
use super::value::ComparableValue;
use super::ComparisonError;
use std::cmp::Ordering;

/// Positional comparison values of a record read back from a sealed segment.
///
/// Sealed records carry every configured column, so they are ordered by per-column
/// dominance instead of by a single designated column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SealedValues {
    values: Vec<Option<ComparableValue>>,
}

impl SealedValues {
    pub fn new(values: Vec<Option<ComparableValue>>) -> Self {
        Self { values }
    }

    pub fn from_columns(columns: &ComparisonColumns, names: &[String]) -> Self {
        Self::new(columns.project(names))
    }

    pub fn values(&self) -> &[Option<ComparableValue>] {
        &self.values
    }

    /// `Greater` when any column of `self` beats `stored`, `Less` when some stored column wins
    /// and none of ours does, `Equal` otherwise. Stored nulls are skipped; a null on our side
    /// against a stored value counts as a loss for that column.
    pub fn compare(&self, stored: &Self, names: &[String]) -> Result<Ordering, ComparisonError> {
        if self.values.len() != stored.values.len() {
            return Err(ComparisonError::ArityMismatch {
                expected: stored.values.len(),
                found: self.values.len(),
            });
        }
        let mut stored_wins = false;
        for (idx, (ours, theirs)) in self.values.iter().zip(&stored.values).enumerate() {
            let Some(theirs) = theirs else {
                continue;
            };
            let column = names.get(idx).map(String::as_str).unwrap_or("?");
            match ours {
                Some(ours) => match compare_values(column, theirs, ours)? {
                    Ordering::Greater => return Ok(Ordering::Greater),
                    Ordering::Less => stored_wins = true,
                    Ordering::Equal => {}
                },
                None => stored_wins = true,
            }
        }
        Ok(if stored_wins {
            Ordering::Less
        } else {
            Ordering::Equal
        })
    }
}

/// Sealed-mode decision over full versions; an accepted version is stored unchanged.
pub fn decide_sealed(
    proposed: &ComparisonColumns,
    stored: &ComparisonColumns,
    names: &[String],
) -> Result<Decision, ComparisonError> {
    let ours = SealedValues::from_columns(proposed, names);
    let theirs = SealedValues::from_columns(stored, names);
    match ours.compare(&theirs, names)? {
        Ordering::Less => Ok(Decision::Reject),
        _ => Ok(Decision::Supersede(proposed.clone())),
    }
}

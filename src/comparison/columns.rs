use super::value::{ComparableValue, ComparisonValue};
use super::ComparisonError;
use std::cmp::Ordering;

/// Outcome of comparing a proposed version against the stored one.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The proposed record wins; carries the version to store for the key.
    Supersede(ComparisonColumns),
    Reject,
}

impl Decision {
    pub fn is_supersede(&self) -> bool {
        matches!(self, Decision::Supersede(_))
    }
}

/// Ordered name to value mapping that acts as the version of a primary key.
///
/// Freshly ingested versions are expected to hold at most one non-null value; stored
/// versions accumulate values as the configured comparison columns evolve.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComparisonColumns {
    columns: Vec<(String, ComparisonValue)>,
}

impl ComparisonColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ComparisonValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a column, keeping its original position when it already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ComparisonValue>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ComparisonValue> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Non-null value of a column; absent and null columns both yield `None`.
    pub fn value_of(&self, name: &str) -> Option<&ComparableValue> {
        self.get(name).and_then(ComparisonValue::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComparisonValue)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn non_null_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|(_, value)| !value.is_null())
            .count()
    }

    /// Numeric value of `column`, used as the record's comparison time.
    pub fn time_value(&self, column: &str) -> Option<f64> {
        self.value_of(column).and_then(ComparableValue::as_f64)
    }

    /// Decides whether `self` (proposed) supersedes `stored`.
    ///
    /// The first non-null column of the proposed version decides. A stored version that never
    /// populated that column cannot reject it; otherwise ties favor the proposed version. A
    /// proposed version without any non-null value is always rejected.
    pub fn decide(&self, stored: &Self) -> Result<Decision, ComparisonError> {
        let Some((column, proposed)) = self.first_non_null() else {
            return Ok(Decision::Reject);
        };
        let supersedes = match stored.value_of(column) {
            None => true,
            Some(existing) => compare_values(column, existing, proposed)? != Ordering::Less,
        };
        if supersedes {
            Ok(Decision::Supersede(self.merged(stored)?))
        } else {
            Ok(Decision::Reject)
        }
    }

    /// Column-wise maximum of both versions; ties and double nulls keep the proposed side.
    pub fn merged(&self, stored: &Self) -> Result<Self, ComparisonError> {
        let mut columns = Vec::with_capacity(self.columns.len().max(stored.columns.len()));
        for (name, proposed) in &self.columns {
            let keep_stored = match (proposed.value(), stored.get(name)) {
                (Some(value), Some(existing)) => match existing.value() {
                    Some(existing_value) => {
                        compare_values(name, existing_value, value)? == Ordering::Less
                    }
                    None => false,
                },
                (None, Some(existing)) => !existing.is_null(),
                (_, None) => false,
            };
            let chosen = match stored.get(name) {
                Some(existing) if keep_stored => existing.clone(),
                _ => proposed.clone(),
            };
            columns.push((name.clone(), chosen));
        }
        for (name, existing) in &stored.columns {
            if self.get(name).is_none() {
                columns.push((name.clone(), existing.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Positional view over `names`; missing and null columns map to `None`.
    pub fn project(&self, names: &[String]) -> Vec<Option<ComparableValue>> {
        names
            .iter()
            .map(|name| self.value_of(name).cloned())
            .collect()
    }

    fn first_non_null(&self) -> Option<(&str, &ComparableValue)> {
        self.columns
            .iter()
            .find_map(|(name, value)| value.value().map(|inner| (name.as_str(), inner)))
    }
}

/// Orders `proposed` relative to `stored`, failing on a type mismatch.
pub(crate) fn compare_values(
    column: &str,
    stored: &ComparableValue,
    proposed: &ComparableValue,
) -> Result<Ordering, ComparisonError> {
    proposed
        .try_cmp(stored)
        .ok_or_else(|| ComparisonError::TypeMismatch {
            column: column.to_string(),
            stored: stored.value_type(),
            proposed: proposed.value_type(),
        })
}

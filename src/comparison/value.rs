use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Physical type of a comparison column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Double,
    Timestamp,
    String,
}

impl ValueType {
    /// Returns the canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::Timestamp => "timestamp",
            ValueType::String => "string",
        }
    }

    /// Placeholder carried by a null value of this type.
    pub fn default_null_value(self) -> ComparableValue {
        match self {
            ValueType::Int => ComparableValue::Int(i64::MIN),
            ValueType::Double => ComparableValue::Double(f64::NEG_INFINITY),
            ValueType::Timestamp => ComparableValue::Timestamp(0),
            ValueType::String => ComparableValue::String("null".to_string()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single orderable value. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ComparableValue {
    Int(i64),
    Double(f64),
    Timestamp(i64),
    String(String),
}

impl ComparableValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ComparableValue::Int(_) => ValueType::Int,
            ComparableValue::Double(_) => ValueType::Double,
            ComparableValue::Timestamp(_) => ValueType::Timestamp,
            ComparableValue::String(_) => ValueType::String,
        }
    }

    /// Natural ordering between two values of the same type; `None` when the types differ.
    pub fn try_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (ComparableValue::Int(a), ComparableValue::Int(b)) => Some(a.cmp(b)),
            (ComparableValue::Double(a), ComparableValue::Double(b)) => Some(a.total_cmp(b)),
            (ComparableValue::Timestamp(a), ComparableValue::Timestamp(b)) => Some(a.cmp(b)),
            (ComparableValue::String(a), ComparableValue::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Numeric view used for TTL bookkeeping. Strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ComparableValue::Int(value) | ComparableValue::Timestamp(value) => Some(*value as f64),
            ComparableValue::Double(value) => Some(*value),
            ComparableValue::String(_) => None,
        }
    }
}

impl From<i64> for ComparableValue {
    fn from(value: i64) -> Self {
        ComparableValue::Int(value)
    }
}

impl From<f64> for ComparableValue {
    fn from(value: f64) -> Self {
        ComparableValue::Double(value)
    }
}

impl From<&str> for ComparableValue {
    fn from(value: &str) -> Self {
        ComparableValue::String(value.to_string())
    }
}

impl From<String> for ComparableValue {
    fn from(value: String) -> Self {
        ComparableValue::String(value)
    }
}

/// Value of one comparison column plus an explicit null flag.
///
/// A null value still carries a typed placeholder so that a column which exists in the
/// schema but was not populated is distinguishable from a column the record never had.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonValue {
    value: ComparableValue,
    is_null: bool,
}

impl ComparisonValue {
    pub fn new(value: impl Into<ComparableValue>) -> Self {
        Self {
            value: value.into(),
            is_null: false,
        }
    }

    /// Null value of the given column type.
    pub fn null(value_type: ValueType) -> Self {
        Self {
            value: value_type.default_null_value(),
            is_null: true,
        }
    }

    pub fn timestamp(epoch_ms: i64) -> Self {
        Self::new(ComparableValue::Timestamp(epoch_ms))
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// The underlying value, hidden when null.
    pub fn value(&self) -> Option<&ComparableValue> {
        (!self.is_null).then_some(&self.value)
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

impl From<ComparableValue> for ComparisonValue {
    fn from(value: ComparableValue) -> Self {
        Self::new(value)
    }
}

impl From<i64> for ComparisonValue {
    fn from(value: i64) -> Self {
        Self::new(ComparableValue::Int(value))
    }
}

impl From<f64> for ComparisonValue {
    fn from(value: f64) -> Self {
        Self::new(ComparableValue::Double(value))
    }
}

impl From<&str> for ComparisonValue {
    fn from(value: &str) -> Self {
        Self::new(ComparableValue::from(value))
    }
}

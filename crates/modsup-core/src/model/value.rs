//! Dynamic tag value — the JSON-shaped scalar (or list) a tag carries.
//!
//! Comparison rules follow the alarm predicates: numeric variants compare
//! numerically across integer/float representations, strings compare
//! lexicographically, lists compare only for equality. Any comparison
//! between incompatible variants is simply "not comparable" (`None`), which
//! alarm evaluation treats as not triggered.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A tag's current value, an alarm trigger value, or a pending write value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// True if this is any of the numeric variants.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::I64(_) | Value::U64(_) | Value::F64(_))
    }

    /// Numeric view as f64, if numeric.
    ///
    /// Used for cross-variant comparison only; precision loss above 2^53
    /// is acceptable there because equality is checked exactly first.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(v) => Some(*v as f64),
            Value::U64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality across variants: numeric values compare by value
    /// (`I64(3) == F64(3.0)`), everything else by variant and content.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::I64(a), Value::U64(b)) | (Value::U64(b), Value::I64(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            _ if self.is_numeric() && other.is_numeric() => {
                // At least one side is a float here.
                self.as_f64() == other.as_f64()
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => false,
        }
    }

    /// Ordering across variants, where one exists.
    ///
    /// Numeric-to-numeric and string-to-string orderings are defined;
    /// everything else (including lists and NaN) yields `None`.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::I64(a), Value::I64(b)) => Some(a.cmp(b)),
            (Value::U64(a), Value::U64(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ if self.is_numeric() && other.is_numeric() => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_variants() {
        assert!(Value::I64(3).loose_eq(&Value::F64(3.0)));
        assert!(Value::U64(7).loose_eq(&Value::I64(7)));
        assert!(!Value::I64(-1).loose_eq(&Value::U64(u64::MAX)));
    }

    #[test]
    fn large_integers_compare_exactly() {
        // 2^63 and 2^63 + 1 both round to the same f64.
        let a = Value::U64(9_223_372_036_854_775_808);
        let b = Value::U64(9_223_372_036_854_775_809);
        assert!(!a.loose_eq(&b));
    }

    #[test]
    fn cross_type_comparison_is_none() {
        assert_eq!(Value::Bool(true).loose_cmp(&Value::I64(1)), None);
        assert_eq!(Value::Str("a".into()).loose_cmp(&Value::I64(1)), None);
        assert_eq!(
            Value::List(vec![Value::I64(1)]).loose_cmp(&Value::List(vec![Value::I64(2)])),
            None
        );
    }

    #[test]
    fn numeric_ordering() {
        assert_eq!(
            Value::I64(2).loose_cmp(&Value::F64(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Str("b".into()).loose_cmp(&Value::Str("a".into())),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn list_equality_is_elementwise() {
        let a = Value::List(vec![Value::I64(1), Value::Bool(true)]);
        let b = Value::List(vec![Value::F64(1.0), Value::Bool(true)]);
        assert!(a.loose_eq(&b));
    }
}

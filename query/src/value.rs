use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A dynamically typed scalar used wherever a predicate or an index needs to
/// look inside a cache value without knowing its concrete type.
///
/// Cross-variant comparisons promote `Integer` against `Float`; any other
/// mixed comparison falls back to the variant rank so that collections of
/// heterogeneous values still have a total order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Total collation order. `Float` uses IEEE total ordering, which sorts
    /// NaN after every finite value.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Integer(b)) => a.total_cmp(&(*b as f64)),
            (String(a), String(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 1, // numerics collate together
            Value::String(_) => 2,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.compare(other)) }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering { self.compare(other) }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Boolean(v) }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Integer(v as i64) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Integer(v) }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

/// Record-like cache values expose named properties for extraction.
/// Scalar value types do not need to implement this; use [`crate::SelfExtractor`] instead.
pub trait Extractable {
    fn value(&self, name: &str) -> Option<Value>;
}

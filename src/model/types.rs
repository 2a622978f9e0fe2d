//! Value and type primitives shared by every stage of the pipeline
//!
//! - `Value`: a scalar cell (literal, member value, result cell)
//! - `ValueType`: the semantic type of an expression's values
//! - `ExprType`: value type plus aggregate/continuous classification

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;

/// A single scalar value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Parse a loosely typed token (timeframe bound, CLI input) into a value
    ///
    /// Tries integer, decimal, ISO date, RFC 3339 timestamp, then falls back to text.
    pub fn parse_loose(s: &str) -> Self {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(n) = s.parse::<f64>() {
            return Value::Number(n);
        }
        Self::parse_temporal(s).unwrap_or_else(|| Value::Text(s.to_string()))
    }

    /// Parse a date or timestamp string
    pub fn parse_temporal(s: &str) -> Option<Self> {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Some(Value::Date(date));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Value::Timestamp(dt.with_timezone(&Utc)));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Some(Value::Timestamp(dt.and_utc()));
        }
        None
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Semantic type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Any,
            Value::Bool(_) => ValueType::Boolean,
            Value::Integer(_) | Value::Number(_) => ValueType::Numeric,
            Value::Text(_) => ValueType::Text,
            Value::Date(_) | Value::Timestamp(_) => ValueType::Temporal,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Milliseconds since epoch for temporal values
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis()),
            Value::Timestamp(t) => Some(t.timestamp_millis()),
            _ => None,
        }
    }

    /// Compare two values of the same ordering family
    ///
    /// Returns `None` when the values are not mutually orderable
    /// (mixed families, nulls, or NaN).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (a, b) if a.as_millis().is_some() && b.as_millis().is_some() => {
                Some(a.as_millis()?.cmp(&b.as_millis()?))
            }
            _ => None,
        }
    }

    /// Equality used by filters: numeric and temporal values compare by magnitude
    pub fn matches(&self, other: &Value) -> bool {
        match self.compare(other) {
            Some(ord) => ord == Ordering::Equal,
            None => self == other,
        }
    }

    /// Stable grouping key
    pub fn key(&self) -> String {
        match self {
            Value::Null => "\u{0}null".to_string(),
            Value::Integer(i) => format!("n:{}", *i as f64),
            Value::Number(n) => format!("n:{}", n),
            other => format!("{:?}", other),
        }
    }

    /// Render as an expression literal (`"text"`, `42`, `true`)
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Text(s) => quote_string(s),
            Value::Date(_) | Value::Timestamp(_) => quote_string(&self.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

/// Quote a string constant the way the expression language expects it
pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Number(n) => serializer.serialize_f64(*n),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => {
                Value::parse_temporal(&s).unwrap_or(Value::Text(s))
            }
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// Semantic value type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Numeric,
    Text,
    Temporal,
    /// Unknown or polymorphic (null literals)
    Any,
}

impl ValueType {
    /// Default sort direction for this type: numeric and temporal values sort descending
    pub fn prefers_descending(&self) -> bool {
        matches!(self, ValueType::Numeric | ValueType::Temporal)
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Numeric => write!(f, "numeric"),
            ValueType::Text => write!(f, "text"),
            ValueType::Temporal => write!(f, "temporal"),
            ValueType::Any => write!(f, "any"),
        }
    }
}

/// Full classification of a resolved expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprType {
    pub value: ValueType,
    /// Aggregate expressions become metrics, everything else becomes a facet
    pub aggregate: bool,
    /// Continuous dimensions are projected as (min, max) ranges
    pub continuous: bool,
}

impl ExprType {
    pub fn scalar(value: ValueType) -> Self {
        Self {
            value,
            aggregate: false,
            continuous: false,
        }
    }

    pub fn aggregate(value: ValueType) -> Self {
        Self {
            value,
            aggregate: true,
            continuous: false,
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.value, ValueType::Boolean | ValueType::Any)
    }
}

//! Computed results
//!
//! - `ResultSet`: physical, label-addressed columns as an engine returns them
//! - `Matrix`: logical axes and measures decoded from a `ResultSet`
//! - `ResultMapper`: binds one to the other

mod mapper;

pub use mapper::{interval, max_label, min_label, Mapping, ResultMapper};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::AnalysisJob;
use crate::model::{Value, ValueType};

/// Physical column holding the roll-up depth of subtotal rows
pub const GROUPING_LABEL: &str = "__grouping";

/// Storage type of a physical column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum PhysicalType {
    Integer,
    Decimal { scale: u32 },
    Text,
    Date,
    Timestamp,
    Boolean,
}

impl PhysicalType {
    /// Best physical type for a semantic type
    pub fn for_value_type(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Numeric => PhysicalType::Decimal { scale: 2 },
            ValueType::Temporal => PhysicalType::Timestamp,
            ValueType::Boolean => PhysicalType::Boolean,
            ValueType::Text | ValueType::Any => PhysicalType::Text,
        }
    }

    /// Infer from the values of a column
    pub fn infer<'a>(values: impl Iterator<Item = &'a Value>, fallback: ValueType) -> Self {
        let mut inferred: Option<PhysicalType> = None;
        for value in values {
            let ty = match value {
                Value::Null => continue,
                Value::Bool(_) => PhysicalType::Boolean,
                Value::Integer(_) => PhysicalType::Integer,
                Value::Number(_) => PhysicalType::Decimal { scale: 2 },
                Value::Text(_) => PhysicalType::Text,
                Value::Date(_) => PhysicalType::Date,
                Value::Timestamp(_) => PhysicalType::Timestamp,
            };
            inferred = Some(match (inferred, ty) {
                (None, ty) => ty,
                (Some(PhysicalType::Integer), PhysicalType::Decimal { scale })
                | (Some(PhysicalType::Decimal { scale }), PhysicalType::Integer) => {
                    PhysicalType::Decimal { scale }
                }
                (Some(PhysicalType::Date), PhysicalType::Timestamp) => PhysicalType::Timestamp,
                (Some(current), _) => current,
            });
        }
        inferred.unwrap_or_else(|| Self::for_value_type(fallback))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhysicalType::Integer => "integer",
            PhysicalType::Decimal { .. } => "decimal",
            PhysicalType::Text => "string",
            PhysicalType::Date => "date",
            PhysicalType::Timestamp => "timestamp",
            PhysicalType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalColumn {
    pub label: String,
    pub ty: PhysicalType,
}

/// Physical result of a computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<PhysicalColumn>,
    pub rows: Vec<Vec<Value>>,
    pub computed_at: DateTime<Utc>,
    /// False when rows were cut by the limit
    pub complete: bool,
}

impl ResultSet {
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.label == label)
    }
}

/// A decoded axis cell
#[derive(Debug, Clone, PartialEq)]
pub enum AxisValue {
    Null,
    Value(Value),
    /// Closed range of a continuous dimension
    Interval { lower: Value, upper: Value },
    /// Range whose bounds cannot be ordered against each other
    Symbolic { lower: String, upper: String },
}

impl AxisValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AxisValue::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AxisValue::Null => serde_json::Value::Null,
            AxisValue::Value(v) => v.to_json(),
            AxisValue::Interval { lower, upper } => {
                serde_json::Value::Array(vec![lower.to_json(), upper.to_json()])
            }
            AxisValue::Symbolic { lower, upper } => serde_json::Value::Array(vec![
                serde_json::Value::String(lower.clone()),
                serde_json::Value::String(upper.clone()),
            ]),
        }
    }
}

impl std::fmt::Display for AxisValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisValue::Null => write!(f, ""),
            AxisValue::Value(v) => write!(f, "{}", v),
            AxisValue::Interval { lower, upper } => write!(f, "[{}, {}]", lower, upper),
            AxisValue::Symbolic { lower, upper } => write!(f, "[{}, {}]", lower, upper),
        }
    }
}

/// Logical header of an axis column
#[derive(Debug, Clone, PartialEq)]
pub struct AxisHeader {
    pub expr: String,
    pub label: String,
    pub value_type: ValueType,
    pub ty: PhysicalType,
    pub continuous: bool,
    pub description: Option<String>,
}

/// Logical header of a measure column
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureHeader {
    pub expr: String,
    pub name: String,
    pub value_type: ValueType,
    pub ty: PhysicalType,
    pub description: Option<String>,
    /// Hidden measures only exist to support ordering
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub axes: Vec<AxisValue>,
    pub measures: Vec<Value>,
    /// Roll-up depth of a subtotal row (`0` for the grand total)
    pub rollup: Option<usize>,
}

/// Logical result of an analysis
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub job_id: String,
    /// Domain id the job ran against
    pub domain: String,
    pub axes: Vec<AxisHeader>,
    pub measures: Vec<MeasureHeader>,
    pub rows: Vec<MatrixRow>,
    pub from_cache: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub complete: bool,
    /// Row count before paging
    pub total_size: usize,
    pub start_index: usize,
    /// Generated query text, for the SQL layout
    pub sql: Option<String>,
}

impl Matrix {
    /// Empty successful result carrying the job's headers
    pub fn empty(job: &AnalysisJob) -> Self {
        let axes = job
            .facets
            .iter()
            .map(|f| AxisHeader {
                expr: f.expr.clone(),
                label: f.label.clone(),
                value_type: f.value_type,
                ty: PhysicalType::for_value_type(f.value_type),
                continuous: f.continuous,
                description: f.description.clone(),
            })
            .collect();
        let measures = job
            .metrics
            .iter()
            .map(|m| MeasureHeader {
                expr: m.expr.clone(),
                name: m.name.clone(),
                value_type: m.value_type,
                ty: PhysicalType::for_value_type(m.value_type),
                description: m.description.clone(),
                visible: true,
            })
            .collect();

        Self {
            job_id: job.id.clone(),
            domain: job.domain.clone(),
            axes,
            measures,
            rows: Vec::new(),
            from_cache: false,
            executed_at: None,
            complete: true,
            total_size: 0,
            start_index: 0,
            sql: None,
        }
    }

    /// Builder method: attach generated query text
    pub fn with_sql(mut self, sql: String) -> Self {
        self.sql = Some(sql);
        self
    }

    /// Keep `max_results` rows starting at `start_index`
    pub fn page(mut self, max_results: Option<usize>, start_index: Option<usize>) -> Self {
        let total = self.rows.len();
        let start = start_index.unwrap_or(0).min(total);
        let end = max_results
            .map(|m| start.saturating_add(m).min(total))
            .unwrap_or(total);
        self.rows = self.rows.drain(start..end).collect();
        self.total_size = total;
        self.start_index = start;
        self
    }

    pub fn visible_measures(&self) -> impl Iterator<Item = (usize, &MeasureHeader)> {
        self.measures.iter().enumerate().filter(|(_, m)| m.visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize) -> Matrix {
        Matrix {
            job_id: "j".into(),
            domain: "sales".into(),
            axes: vec![],
            measures: vec![],
            rows: (0..rows)
                .map(|i| MatrixRow {
                    axes: vec![],
                    measures: vec![Value::Integer(i as i64)],
                    rollup: None,
                })
                .collect(),
            from_cache: false,
            executed_at: None,
            complete: true,
            total_size: rows,
            start_index: 0,
            sql: None,
        }
    }

    #[test]
    fn test_paging() {
        let page = matrix(10).page(Some(3), Some(4));
        assert_eq!(page.total_size, 10);
        assert_eq!(page.start_index, 4);
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.rows[0].measures[0], Value::Integer(4));

        let tail = matrix(10).page(None, Some(8));
        assert_eq!(tail.rows.len(), 2);

        let past = matrix(3).page(Some(5), Some(9));
        assert!(past.rows.is_empty());
        assert_eq!(past.total_size, 3);
    }

    #[test]
    fn test_physical_type_inference() {
        let values = vec![Value::Integer(1), Value::Null, Value::Number(2.5)];
        assert_eq!(
            PhysicalType::infer(values.iter(), ValueType::Numeric),
            PhysicalType::Decimal { scale: 2 }
        );
        let values = vec![Value::Integer(1), Value::Integer(2)];
        assert_eq!(PhysicalType::infer(values.iter(), ValueType::Numeric), PhysicalType::Integer);
        assert_eq!(
            PhysicalType::infer(std::iter::empty(), ValueType::Temporal),
            PhysicalType::Timestamp
        );
    }

    #[test]
    fn test_axis_value_json() {
        let interval = AxisValue::Interval {
            lower: Value::Integer(3),
            upper: Value::Integer(7),
        };
        assert_eq!(interval.to_json(), serde_json::json!([3, 7]));
        assert_eq!(interval.to_string(), "[3, 7]");
        assert!(AxisValue::Null.to_json().is_null());
    }
}

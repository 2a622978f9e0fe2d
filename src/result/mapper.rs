//! Physical result columns into logical axes and measures
//!
//! Each logical column binds once, by label, to its physical column(s):
//! a facet to its expression column, a continuous facet to its
//! `min(expr)`/`max(expr)` pair, a metric to its expression column. Any
//! remaining physical column (an order-by on something not projected)
//! becomes a hidden measure.

use std::collections::HashMap;

use super::{
    AxisHeader, AxisValue, Matrix, MatrixRow, MeasureHeader, PhysicalType, ResultSet,
    GROUPING_LABEL,
};
use crate::error::{AnalysisError, AnalysisResult};
use crate::job::AnalysisJob;
use crate::model::{Value, ValueType};

/// Physical label of the lower bound column of a continuous facet
pub fn min_label(expr: &str) -> String {
    format!("min({})", expr)
}

/// Physical label of the upper bound column of a continuous facet
pub fn max_label(expr: &str) -> String {
    format!("max({})", expr)
}

/// Binding of one logical column to its physical column(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// Discrete facet
    Axis { axis: usize, column: usize },
    /// Continuous facet decoded from a (min, max) pair
    Dimension { axis: usize, min: usize, max: usize },
    Measure { measure: usize, column: usize },
}

impl Mapping {
    fn decode_axis(&self, row: &[Value]) -> Option<AxisValue> {
        let cell = |i: usize| row.get(i).cloned().unwrap_or(Value::Null);
        match *self {
            Mapping::Axis { column, .. } => Some(match cell(column) {
                Value::Null => AxisValue::Null,
                value => AxisValue::Value(value),
            }),
            Mapping::Dimension { min, max, .. } => Some(interval(cell(min), cell(max))),
            Mapping::Measure { .. } => None,
        }
    }
}

/// Rebuild a continuous value from its bounds
pub fn interval(lower: Value, upper: Value) -> AxisValue {
    match (lower, upper) {
        (Value::Null, Value::Null) => AxisValue::Null,
        (lower, upper) if lower.compare(&upper).is_some() => AxisValue::Interval { lower, upper },
        (lower, upper) => AxisValue::Symbolic {
            lower: lower.to_string(),
            upper: upper.to_string(),
        },
    }
}

/// Bound mappings of a job against one result set
#[derive(Debug, Clone)]
pub struct ResultMapper {
    mappings: Vec<Mapping>,
    /// Expression to mapping position
    index: HashMap<String, usize>,
    axes: Vec<AxisHeader>,
    measures: Vec<MeasureHeader>,
    grouping: Option<usize>,
}

impl ResultMapper {
    /// Bind every logical column of `job` to the columns of `result`
    pub fn bind(job: &AnalysisJob, result: &ResultSet) -> AnalysisResult<Self> {
        let column = |label: &str| {
            result.column_index(label).ok_or_else(|| {
                AnalysisError::Computation(format!("result is missing column '{}'", label))
            })
        };
        let physical = |i: usize, fallback: ValueType| {
            result
                .columns
                .get(i)
                .map(|c| c.ty)
                .unwrap_or_else(|| PhysicalType::for_value_type(fallback))
        };

        let mut mappings = Vec::new();
        let mut index = HashMap::new();
        let mut axes = Vec::with_capacity(job.facets.len());
        let mut measures = Vec::with_capacity(job.metrics.len());
        let mut bound = vec![false; result.columns.len()];

        for (axis, facet) in job.facets.iter().enumerate() {
            let mapping = if facet.continuous {
                let min = column(&min_label(&facet.expr))?;
                let max = column(&max_label(&facet.expr))?;
                bound[min] = true;
                bound[max] = true;
                Mapping::Dimension { axis, min, max }
            } else {
                let c = column(&facet.expr)?;
                bound[c] = true;
                Mapping::Axis { axis, column: c }
            };
            let first = match mapping {
                Mapping::Dimension { min, .. } => min,
                Mapping::Axis { column, .. } | Mapping::Measure { column, .. } => column,
            };
            axes.push(AxisHeader {
                expr: facet.expr.clone(),
                label: facet.label.clone(),
                value_type: facet.value_type,
                ty: physical(first, facet.value_type),
                continuous: facet.continuous,
                description: facet.description.clone(),
            });
            index.insert(facet.expr.clone(), mappings.len());
            mappings.push(mapping);
        }

        for (measure, metric) in job.metrics.iter().enumerate() {
            let c = column(&metric.expr)?;
            bound[c] = true;
            measures.push(MeasureHeader {
                expr: metric.expr.clone(),
                name: metric.name.clone(),
                value_type: metric.value_type,
                ty: physical(c, metric.value_type),
                description: metric.description.clone(),
                visible: true,
            });
            index.insert(metric.expr.clone(), mappings.len());
            mappings.push(Mapping::Measure { measure, column: c });
        }

        let grouping = result.column_index(GROUPING_LABEL);
        for (c, physical_column) in result.columns.iter().enumerate() {
            if bound[c] || Some(c) == grouping || index.contains_key(&physical_column.label) {
                continue;
            }
            let measure = measures.len();
            measures.push(MeasureHeader {
                expr: physical_column.label.clone(),
                name: physical_column.label.clone(),
                value_type: ValueType::Any,
                ty: physical_column.ty,
                description: None,
                visible: false,
            });
            index.insert(physical_column.label.clone(), mappings.len());
            mappings.push(Mapping::Measure { measure, column: c });
        }

        Ok(Self {
            mappings,
            index,
            axes,
            measures,
            grouping,
        })
    }

    /// Mapping of an expression, independent of physical column order
    pub fn lookup(&self, expr: &str) -> Option<&Mapping> {
        self.index.get(expr).and_then(|&i| self.mappings.get(i))
    }

    pub fn decode_row(&self, row: &[Value]) -> MatrixRow {
        let mut axes = vec![AxisValue::Null; self.axes.len()];
        let mut measures = vec![Value::Null; self.measures.len()];
        for mapping in &self.mappings {
            match *mapping {
                Mapping::Axis { axis, .. } | Mapping::Dimension { axis, .. } => {
                    if let Some(value) = mapping.decode_axis(row) {
                        axes[axis] = value;
                    }
                }
                Mapping::Measure { measure, column } => {
                    measures[measure] = row.get(column).cloned().unwrap_or(Value::Null);
                }
            }
        }
        let rollup = self
            .grouping
            .and_then(|g| row.get(g))
            .and_then(|v| match v {
                Value::Integer(depth) if *depth >= 0 => Some(*depth as usize),
                _ => None,
            });
        MatrixRow {
            axes,
            measures,
            rollup,
        }
    }

    /// Decode a whole result set
    pub fn map(&self, job: &AnalysisJob, result: &ResultSet, from_cache: bool) -> Matrix {
        let rows: Vec<MatrixRow> = result.rows.iter().map(|r| self.decode_row(r)).collect();
        Matrix {
            job_id: job.id.clone(),
            domain: job.domain.clone(),
            axes: self.axes.clone(),
            measures: self.measures.clone(),
            total_size: rows.len(),
            rows,
            from_cache,
            executed_at: Some(result.computed_at),
            complete: result.complete,
            start_index: 0,
            sql: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FacetSpec, IndexLookup, MetricSpec};
    use crate::result::PhysicalColumn;
    use crate::selection::Selection;
    use chrono::Utc;

    fn job() -> AnalysisJob {
        AnalysisJob {
            id: "j1".into(),
            owner: "alice".into(),
            domain: "sales".into(),
            selection: Selection::new(),
            facets: vec![
                FacetSpec {
                    expr: "@'sales'.@'country'".into(),
                    label: "'Country'".into(),
                    value_type: ValueType::Text,
                    continuous: false,
                    description: None,
                },
                FacetSpec {
                    expr: "@'sales'.@'quantity'".into(),
                    label: "'Quantity'".into(),
                    value_type: ValueType::Numeric,
                    continuous: true,
                    description: None,
                },
            ],
            metrics: vec![MetricSpec {
                expr: "@'sales'.@'revenue'".into(),
                name: "'Revenue'".into(),
                value_type: ValueType::Numeric,
                description: None,
            }],
            order_by: vec![],
            rollups: vec![],
            limit: None,
            offset: None,
            beyond_limit: vec![],
            anchor: chrono::NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            lookup: IndexLookup::default(),
        }
    }

    fn column(label: &str, ty: PhysicalType) -> PhysicalColumn {
        PhysicalColumn {
            label: label.into(),
            ty,
        }
    }

    fn result(rows: Vec<Vec<Value>>) -> ResultSet {
        // physical order differs from logical order on purpose
        ResultSet {
            columns: vec![
                column("@'sales'.@'revenue'", PhysicalType::Decimal { scale: 2 }),
                column("max(@'sales'.@'quantity')", PhysicalType::Integer),
                column("@'sales'.@'country'", PhysicalType::Text),
                column("min(@'sales'.@'quantity')", PhysicalType::Integer),
                column("@'sales'.count()", PhysicalType::Integer),
                column(GROUPING_LABEL, PhysicalType::Integer),
            ],
            rows,
            computed_at: Utc::now(),
            complete: true,
        }
    }

    #[test]
    fn test_interval_reconstruction() {
        assert_eq!(
            interval(Value::Integer(5), Value::Integer(5)),
            AxisValue::Interval {
                lower: Value::Integer(5),
                upper: Value::Integer(5)
            }
        );
        assert_eq!(interval(Value::Null, Value::Null), AxisValue::Null);
        assert_eq!(
            interval(Value::Integer(3), Value::Number(7.0)),
            AxisValue::Interval {
                lower: Value::Integer(3),
                upper: Value::Number(7.0)
            }
        );
        assert_eq!(
            interval(Value::Text("Q1".into()), Value::Integer(2024)),
            AxisValue::Symbolic {
                lower: "Q1".into(),
                upper: "2024".into()
            }
        );
    }

    #[test]
    fn test_bind_by_label() {
        let job = job();
        let result = result(vec![vec![
            Value::Number(120.5),
            Value::Integer(9),
            Value::from("France"),
            Value::Integer(2),
            Value::Integer(4),
            Value::Null,
        ]]);
        let mapper = ResultMapper::bind(&job, &result).unwrap();
        let matrix = mapper.map(&job, &result, false);

        let row = &matrix.rows[0];
        assert_eq!(row.axes[0], AxisValue::Value(Value::from("France")));
        assert_eq!(
            row.axes[1],
            AxisValue::Interval {
                lower: Value::Integer(2),
                upper: Value::Integer(9)
            }
        );
        assert_eq!(row.measures[0], Value::Number(120.5));
        assert_eq!(row.rollup, None);
        assert_eq!(matrix.axes[1].ty, PhysicalType::Integer);
    }

    #[test]
    fn test_unprojected_columns_are_hidden_measures() {
        let job = job();
        let result = result(vec![vec![
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Integer(10),
            Value::Integer(0),
        ]]);
        let mapper = ResultMapper::bind(&job, &result).unwrap();

        assert!(matches!(
            mapper.lookup("@'sales'.count()"),
            Some(Mapping::Measure { measure: 1, column: 4 })
        ));
        assert!(matches!(
            mapper.lookup("@'sales'.@'quantity'"),
            Some(Mapping::Dimension { min: 3, max: 1, .. })
        ));

        let matrix = mapper.map(&job, &result, true);
        assert!(!matrix.measures[1].visible);
        assert_eq!(matrix.visible_measures().count(), 1);
        assert_eq!(matrix.rows[0].rollup, Some(0));
        assert_eq!(matrix.rows[0].axes[1], AxisValue::Null);
        assert!(matrix.from_cache);
    }

    #[test]
    fn test_missing_column_fails() {
        let job = job();
        let mut result = result(vec![]);
        result.columns.remove(2);
        let err = ResultMapper::bind(&job, &result).unwrap_err();
        assert!(err.innermost_message().contains("missing column"));
    }
}

//! Output layouts
//!
//! A [`Matrix`] is laid out for the caller in one of the [`Layout`]s. Every
//! layout carries the same [`Header`] list; only the body shape differs.

mod export;
mod header;

pub use export::{encode, Export};
pub use header::{format_for, headers, ColumnRole, Header};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::collections::HashSet;

use crate::model::{SemanticModel, Style};
use crate::request::Layout;
use crate::result::{Matrix, MatrixRow, GROUPING_LABEL};

/// Execution facts reported with every output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputInfo {
    pub job_id: String,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    pub complete: bool,
    pub total_size: usize,
    pub start_index: usize,
}

/// A measure as one series over the row categories
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<Json>,
}

/// Older column descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyColumn {
    pub id: String,
    pub name: String,
    pub role: ColumnRole,
    #[serde(rename = "type")]
    pub ty: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyRow {
    pub v: Vec<Json>,
}

/// Layout-specific body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "layout", rename_all = "lowercase")]
pub enum Body {
    Table {
        columns: Vec<Vec<Json>>,
        /// Roll-up depth per row, null for detail rows
        rollups: Vec<Option<usize>>,
    },
    Records {
        rows: Vec<Map<String, Json>>,
    },
    Transpose {
        categories: Vec<String>,
        series: Vec<Series>,
    },
    Legacy {
        cols: Vec<LegacyColumn>,
        rows: Vec<LegacyRow>,
    },
    Sql {
        sql: String,
    },
}

/// A laid out analysis result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub info: OutputInfo,
    pub header: Vec<Header>,
    #[serde(flatten)]
    pub body: Body,
}

impl Output {
    /// Display names and text cells, in row-major order
    pub fn grid(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let names = || self.header.iter().map(|h| h.name.clone()).collect::<Vec<_>>();
        match &self.body {
            Body::Table { columns, .. } => {
                let height = columns.first().map(Vec::len).unwrap_or(0);
                let rows = (0..height)
                    .map(|r| columns.iter().map(|c| cell_text(&c[r])).collect())
                    .collect();
                (names(), rows)
            }
            Body::Records { rows } => {
                let keys = record_keys(&self.header);
                let rows = rows
                    .iter()
                    .map(|row| {
                        keys.iter()
                            .map(|k| row.get(k).map(cell_text).unwrap_or_default())
                            .collect()
                    })
                    .collect();
                (names(), rows)
            }
            Body::Transpose { categories, series } => {
                let mut names = vec![String::new()];
                names.extend(categories.iter().cloned());
                let rows = series
                    .iter()
                    .map(|s| {
                        std::iter::once(s.name.clone())
                            .chain(s.values.iter().map(cell_text))
                            .collect()
                    })
                    .collect();
                (names, rows)
            }
            Body::Legacy { cols, rows } => (
                cols.iter().map(|c| c.name.clone()).collect(),
                rows.iter().map(|r| r.v.iter().map(cell_text).collect()).collect(),
            ),
            Body::Sql { sql } => (vec!["sql".to_string()], vec![vec![sql.clone()]]),
        }
    }
}

/// Render a JSON cell as plain text
pub fn cell_text(value: &Json) -> String {
    match value {
        Json::Null => String::new(),
        Json::String(s) => s.clone(),
        Json::Array(items) => format!(
            "[{}]",
            items.iter().map(cell_text).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

/// Lays out matrices
pub struct OutputConverter<'a> {
    model: &'a dyn SemanticModel,
}

impl<'a> OutputConverter<'a> {
    pub fn new(model: &'a dyn SemanticModel) -> Self {
        Self { model }
    }

    pub fn convert(&self, matrix: &Matrix, layout: Layout, style: Style) -> Output {
        let header = headers(self.model, matrix, style);
        let info = OutputInfo {
            job_id: matrix.job_id.clone(),
            from_cache: matrix.from_cache,
            executed_at: matrix.executed_at,
            complete: matrix.complete,
            total_size: matrix.total_size,
            start_index: matrix.start_index,
        };
        let visible: Vec<usize> = matrix.visible_measures().map(|(i, _)| i).collect();
        let cells = |row: &MatrixRow| -> Vec<Json> {
            row.axes
                .iter()
                .map(|a| a.to_json())
                .chain(visible.iter().map(|&i| {
                    row.measures.get(i).map(|m| m.to_json()).unwrap_or(Json::Null)
                }))
                .collect()
        };

        let body = match layout {
            Layout::Table => {
                let mut columns = vec![Vec::with_capacity(matrix.rows.len()); header.len()];
                for row in &matrix.rows {
                    for (c, cell) in cells(row).into_iter().enumerate() {
                        if let Some(column) = columns.get_mut(c) {
                            column.push(cell);
                        }
                    }
                }
                Body::Table {
                    columns,
                    rollups: matrix.rows.iter().map(|r| r.rollup).collect(),
                }
            }
            Layout::Records => {
                let keys = record_keys(&header);
                Body::Records {
                    rows: matrix
                        .rows
                        .iter()
                        .map(|row| {
                            let mut record: Map<String, Json> =
                                keys.iter().cloned().zip(cells(row)).collect();
                            if let Some(depth) = row.rollup {
                                record.insert(GROUPING_LABEL.to_string(), Json::from(depth));
                            }
                            record
                        })
                        .collect(),
                }
            }
            Layout::Transpose => Body::Transpose {
                categories: matrix
                    .rows
                    .iter()
                    .map(|row| match row.rollup {
                        Some(0) => "Total".to_string(),
                        _ => row
                            .axes
                            .iter()
                            .filter(|a| !a.is_null())
                            .map(|a| a.to_string())
                            .collect::<Vec<_>>()
                            .join(" / "),
                    })
                    .collect(),
                series: matrix
                    .visible_measures()
                    .map(|(i, measure)| Series {
                        name: measure.name.clone(),
                        values: matrix
                            .rows
                            .iter()
                            .map(|row| row.measures.get(i).map(|m| m.to_json()).unwrap_or(Json::Null))
                            .collect(),
                    })
                    .collect(),
            },
            Layout::Legacy => Body::Legacy {
                cols: header
                    .iter()
                    .map(|h| LegacyColumn {
                        id: h.id.clone(),
                        name: h.name.clone(),
                        role: h.role,
                        ty: h.physical,
                        format: h.format,
                    })
                    .collect(),
                rows: matrix.rows.iter().map(|row| LegacyRow { v: cells(row) }).collect(),
            },
            Layout::Sql => Body::Sql {
                sql: matrix.sql.clone().unwrap_or_default(),
            },
        };

        Output { info, header, body }
    }
}

/// Object keys of a record: the display name, suffixed with the column
/// position when an earlier column already uses it
fn record_keys(header: &[Header]) -> Vec<String> {
    let mut used = HashSet::new();
    header
        .iter()
        .map(|h| {
            let key = if used.contains(&h.name) {
                format!("{} ({})", h.name, h.position)
            } else {
                h.name.clone()
            };
            used.insert(key.clone());
            key
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Value, ValueType};
    use crate::result::{AxisHeader, AxisValue, MeasureHeader, PhysicalType};
    use crate::test_support::catalog;

    fn matrix() -> Matrix {
        let row = |country: Option<&str>, revenue: f64, rollup| MatrixRow {
            axes: vec![
                country
                    .map(|c| AxisValue::Value(Value::from(c)))
                    .unwrap_or(AxisValue::Null),
                AxisValue::Interval {
                    lower: Value::Integer(1),
                    upper: Value::Integer(4),
                },
            ],
            measures: vec![Value::Number(revenue), Value::Integer(3)],
            rollup,
        };
        Matrix {
            job_id: "j1".into(),
            domain: "sales".into(),
            axes: vec![
                AxisHeader {
                    expr: "@'sales'.@'country'".into(),
                    label: "'Country'".into(),
                    value_type: ValueType::Text,
                    ty: PhysicalType::Text,
                    continuous: false,
                    description: None,
                },
                AxisHeader {
                    expr: "@'sales'.@'quantity'".into(),
                    label: "'Quantity'".into(),
                    value_type: ValueType::Numeric,
                    ty: PhysicalType::Integer,
                    continuous: true,
                    description: None,
                },
            ],
            measures: vec![
                MeasureHeader {
                    expr: "@'sales'.@'revenue'".into(),
                    name: "'Revenue'".into(),
                    value_type: ValueType::Numeric,
                    ty: PhysicalType::Decimal { scale: 2 },
                    description: Some("Total amount".into()),
                    visible: true,
                },
                MeasureHeader {
                    expr: "@'sales'.count()".into(),
                    name: "@'sales'.count()".into(),
                    value_type: ValueType::Any,
                    ty: PhysicalType::Integer,
                    description: None,
                    visible: false,
                },
            ],
            rows: vec![
                row(Some("France"), 150.0, None),
                row(Some("Spain"), 40.0, None),
                row(None, 190.0, Some(0)),
            ],
            from_cache: false,
            executed_at: None,
            complete: true,
            total_size: 3,
            start_index: 0,
            sql: None,
        }
    }

    #[test]
    fn test_header_definitions_follow_style() {
        let catalog = catalog();
        let converter = OutputConverter::new(&catalog);

        let human = converter.convert(&matrix(), Layout::Records, Style::Human);
        assert_eq!(human.header.len(), 3);
        assert_eq!(human.header[0].definition, "'Country'");
        assert_eq!(human.header[2].position, 2);
        assert_eq!(human.header[2].format, Some("#,##0.00"));
        assert!(human.header[1].interval);

        let robot = converter.convert(&matrix(), Layout::Records, Style::Robot);
        assert_eq!(robot.header[0].definition, "@'country'");
    }

    #[test]
    fn test_records_and_table_layouts() {
        let catalog = catalog();
        let converter = OutputConverter::new(&catalog);

        let records = converter.convert(&matrix(), Layout::Records, Style::Human);
        let Body::Records { rows } = &records.body else {
            panic!("expected records");
        };
        assert_eq!(rows[0]["'Country'"], serde_json::json!("France"));
        assert_eq!(rows[0]["'Quantity'"], serde_json::json!([1, 4]));
        assert!(!rows[0].contains_key("@'sales'.count()"));
        assert_eq!(rows[2][GROUPING_LABEL], serde_json::json!(0));

        let table = converter.convert(&matrix(), Layout::Table, Style::Human);
        let Body::Table { columns, rollups } = &table.body else {
            panic!("expected table");
        };
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2], vec![serde_json::json!(150.0), serde_json::json!(40.0), serde_json::json!(190.0)]);
        assert_eq!(rollups, &vec![None, None, Some(0)]);
    }

    #[test]
    fn test_transpose_and_legacy_layouts() {
        let catalog = catalog();
        let converter = OutputConverter::new(&catalog);

        let transposed = converter.convert(&matrix(), Layout::Transpose, Style::Human);
        let Body::Transpose { categories, series } = &transposed.body else {
            panic!("expected transpose");
        };
        assert_eq!(categories, &vec!["France / [1, 4]", "Spain / [1, 4]", "Total"]);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "'Revenue'");

        let legacy = converter.convert(&matrix(), Layout::Legacy, Style::Legacy);
        let json = serde_json::to_value(&legacy).unwrap();
        assert_eq!(json["layout"], "legacy");
        assert_eq!(json["cols"][1]["role"], "dimension");
        assert_eq!(json["cols"][2]["type"], "decimal");
        assert_eq!(json["rows"][1]["v"][0], "Spain");
    }

    #[test]
    fn test_grid_is_row_major() {
        let catalog = catalog();
        let output = OutputConverter::new(&catalog).convert(&matrix(), Layout::Table, Style::Human);
        let (names, rows) = output.grid();
        assert_eq!(names, vec!["'Country'", "'Quantity'", "'Revenue'"]);
        assert_eq!(rows[1], vec!["Spain", "[1, 4]", "40.0"]);
        assert_eq!(rows[2][0], "");
    }

    #[test]
    fn test_records_keep_duplicate_names() {
        let catalog = catalog();
        let mut matrix = matrix();
        let mut twice = matrix.measures[0].clone();
        twice.expr = "@'sales'.@'revenue' * 2".into();
        matrix.measures.push(twice);
        for row in &mut matrix.rows {
            let doubled = match row.measures[0] {
                Value::Number(n) => Value::Number(n * 2.0),
                ref other => other.clone(),
            };
            row.measures.push(doubled);
        }

        let records = OutputConverter::new(&catalog).convert(&matrix, Layout::Records, Style::Human);
        assert_eq!(records.header.len(), 4);
        let second = format!("'Revenue' ({})", records.header[3].position);
        let Body::Records { rows } = &records.body else {
            panic!("expected records");
        };
        assert_eq!(rows[0]["'Revenue'"], serde_json::json!(150.0));
        assert_eq!(rows[0][second.as_str()], serde_json::json!(300.0));

        let (names, cells) = records.grid();
        assert_eq!(names[2], names[3]);
        assert_eq!(cells[1][2..], ["40.0".to_string(), "80.0".to_string()]);
    }
}

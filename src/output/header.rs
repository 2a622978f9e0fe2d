//! Column headers of an output

use serde::Serialize;

use crate::model::{SemanticModel, Style, ValueType};
use crate::result::{Matrix, PhysicalType};

/// Whether a column is an axis or a measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Dimension,
    Metric,
}

/// One visible output column
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub position: usize,
    /// Expression in global robot form
    pub id: String,
    /// Display name
    pub name: String,
    /// Definition pretty printed in the requested style
    pub definition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub role: ColumnRole,
    pub value_type: ValueType,
    #[serde(rename = "type")]
    pub physical: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    /// Axis rendered as a `[lower, upper]` range
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interval: bool,
}

/// Display pattern for a physical type
pub fn format_for(ty: PhysicalType) -> Option<&'static str> {
    match ty {
        PhysicalType::Timestamp => Some("yyyy-MM-dd'T'HH:mm:ss.SSSZ"),
        PhysicalType::Date => Some("yyyy-MM-dd"),
        PhysicalType::Integer => Some("#,##0"),
        PhysicalType::Decimal { scale } if scale > 0 => Some("#,##0.00"),
        PhysicalType::Decimal { .. } => Some("#,##0"),
        PhysicalType::Text | PhysicalType::Boolean => None,
    }
}

/// Headers of the visible columns: axes first, then visible measures
pub fn headers(model: &dyn SemanticModel, matrix: &Matrix, style: Style) -> Vec<Header> {
    let definition = |expr: &str| match model.parse(expr, None) {
        Ok(parsed) => model.pretty_print(&parsed, style, Some(&matrix.domain)),
        Err(_) => expr.to_string(),
    };

    let axes = matrix.axes.iter().map(|axis| Header {
        position: 0,
        id: axis.expr.clone(),
        name: axis.label.clone(),
        definition: definition(&axis.expr),
        description: axis.description.clone(),
        role: ColumnRole::Dimension,
        value_type: axis.value_type,
        physical: axis.ty.name(),
        format: format_for(axis.ty),
        interval: axis.continuous,
    });
    let measures = matrix.visible_measures().map(|(_, measure)| Header {
        position: 0,
        id: measure.expr.clone(),
        name: measure.name.clone(),
        definition: definition(&measure.expr),
        description: measure.description.clone(),
        role: ColumnRole::Metric,
        value_type: measure.value_type,
        physical: measure.ty.name(),
        format: format_for(measure.ty),
        interval: false,
    });

    axes.chain(measures)
        .enumerate()
        .map(|(position, header)| Header { position, ..header })
        .collect()
}

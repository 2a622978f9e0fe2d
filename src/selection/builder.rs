//! Request filters, period and timeframe into a structured `Selection`

use chrono::Utc;
use tracing::debug;

use super::timeframe::{resolve_compare, resolve_shortcut, DateRange};
use super::{Bound, Facet, Member, Selection};
use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{
    print_global, BinaryOp, Expr, RefKind, Reference, ScopeError, SemanticModel, Style, Value,
};
use crate::request::{Request, Space, WILDCARD};

/// Builds the selection of a resolved request
pub struct SelectionBuilder<'a> {
    model: &'a dyn SemanticModel,
}

impl<'a> SelectionBuilder<'a> {
    pub fn new(model: &'a dyn SemanticModel) -> Self {
        Self { model }
    }

    /// Build the selection; fails when a filter is not boolean
    pub fn build(&self, space: &Space, request: &Request) -> AnalysisResult<Selection> {
        let domain_text = request.domain.as_deref().unwrap_or(&space.domain);
        let domain = self.model.resolve_domain(domain_text)?;
        let mut selection = Selection::new();

        if let Some(period) = request.period.as_deref() {
            let axis = self.model.parse(period, Some(&domain.id))?;
            if let Some(timeframe) = non_empty(&request.timeframe) {
                selection.facets.push(period_facet(&axis, timeframe, false)?);
            }
            if let Some(compare) = non_empty(&request.compare_to) {
                selection.compare_to.push(period_facet(&axis, compare, true)?);
            }
        }

        for text in request.filters.iter().flatten() {
            let text = text.trim();
            if text.is_empty() || text == WILDCARD {
                continue;
            }
            let expr = self.model.parse(text, Some(&domain.id))?;
            let ty = expr.expr_type();
            if !ty.is_boolean() {
                return Err(ScopeError::new("filter is not a boolean expression", text).into());
            }
            if ty.aggregate {
                return Err(ScopeError::new("filter cannot use an aggregate", text).into());
            }
            add_filter(&mut selection, expr, text);
        }

        debug!(
            domain = %domain.id,
            facets = selection.facets.len(),
            compare = selection.compare_to.len(),
            "Selection built"
        );
        Ok(selection)
    }
}

fn non_empty(list: &Option<Vec<String>>) -> Option<&[String]> {
    list.as_deref().filter(|l| !l.is_empty())
}

fn period_facet(axis: &Expr, tokens: &[String], compare: bool) -> AnalysisResult<Facet> {
    let bounds = tokens.iter().map(|t| Bound::parse(t)).collect::<Vec<_>>();
    for bound in &bounds {
        validate_bound(bound, compare)?;
    }

    let (lower, upper) = match bounds.as_slice() {
        [single] => (single.clone(), single.clone()),
        [lower, upper] => (lower.clone(), upper.clone()),
        _ => {
            return Err(AnalysisError::Config(format!(
                "timeframe takes one or two values, got {}",
                tokens.len()
            )))
        }
    };

    let id = print_global(axis, Style::Robot);
    let dimension = axis.as_reference().map(|r| r.target.name.clone());
    Ok(Facet::interval(id, dimension, lower, upper))
}

/// Reject unknown shortcut tokens up front
fn validate_bound(bound: &Bound, compare: bool) -> AnalysisResult<()> {
    let token = match bound {
        Bound::Shortcut(token) => token,
        Bound::Value(_) => return Ok(()),
    };
    let today = Utc::now().date_naive();
    if compare && token.starts_with("__COMPARE_TO_") {
        resolve_compare(token, &DateRange::new(today, today))?;
    } else {
        resolve_shortcut(token, today)?;
    }
    Ok(())
}

fn add_filter(selection: &mut Selection, expr: Expr, text: &str) {
    if let Some(segment) = expr.as_reference().filter(|r| r.kind == RefKind::Segment) {
        selection.push_segment(&segment.target.id);
        return;
    }

    if let Some((axis, values)) = discrete_members(&expr) {
        let id = print_global(&Expr::Reference(axis.clone()), Style::Robot);
        // A second constraint on the same axis stays open so both still apply
        if selection.facet(&id).is_none() {
            let members = values.into_iter().map(|value| Member::Discrete { value }).collect();
            selection
                .facets
                .push(Facet::new(id, Some(axis.target.name.clone()), members));
            return;
        }
    }

    selection.push_open(print_global(&expr, Style::Robot), text.to_string());
}

/// `dim = const`, `const = dim` or `dim IN {consts}`
fn discrete_members(expr: &Expr) -> Option<(&Reference, Vec<Value>)> {
    let (op, lhs, rhs) = match expr {
        Expr::Binary { op, lhs, rhs } => (*op, lhs.as_ref(), rhs.as_ref()),
        _ => return None,
    };

    match op {
        BinaryOp::Eq => {
            let pair = match (lhs.as_dimension(), rhs.as_literal()) {
                (Some(axis), Some(value)) => Some((axis, value)),
                _ => rhs.as_dimension().zip(lhs.as_literal()),
            };
            pair.filter(|(_, v)| !v.is_null())
                .map(|(axis, v)| (axis, vec![v.clone()]))
        }
        BinaryOp::In => match (lhs.as_dimension(), rhs) {
            (Some(axis), Expr::Set(items)) => {
                let values = items
                    .iter()
                    .map(|i| i.as_literal().filter(|v| !v.is_null()).cloned())
                    .collect::<Option<Vec<_>>>()?;
                if values.is_empty() {
                    None
                } else {
                    Some((axis, values))
                }
            }
            _ => None,
        },
        _ => None,
    }
}

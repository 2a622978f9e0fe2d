//! Expression evaluation over in-memory rows

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::Datelike;

use super::runner::Row;
use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{BinaryOp, Catalog, Expr, RefKind, Reference, SemanticModel, UnaryOp, Value, AGGREGATES, SORT_ASC, SORT_DESC};

/// Parsed definitions of dimensions, metrics and segments, keyed by `domain:id`
#[derive(Debug, Clone, Default)]
pub(super) struct Definitions {
    dimensions: HashMap<String, Expr>,
    metrics: HashMap<String, Expr>,
    segments: HashMap<String, Expr>,
}

fn key(domain: &str, id: &str) -> String {
    format!("{}:{}", domain, id)
}

impl Definitions {
    /// Parse every stored definition of the catalog once
    pub(super) fn compile(catalog: &Catalog) -> AnalysisResult<Self> {
        let mut definitions = Self::default();
        for domain in &catalog.domains {
            for dimension in &domain.dimensions {
                if let Some(text) = &dimension.expression {
                    let expr = catalog.parse_definition(text, &domain.id)?;
                    definitions.dimensions.insert(key(&domain.id, &dimension.id), expr);
                }
            }
            for metric in &domain.metrics {
                let expr = catalog.parse(&metric.expression, Some(&domain.id))?;
                definitions.metrics.insert(key(&domain.id, &metric.id), expr);
            }
            for segment in &domain.segments {
                let expr = catalog.parse(&segment.expression, Some(&domain.id))?;
                definitions.segments.insert(key(&domain.id, &segment.id), expr);
            }
        }
        Ok(definitions)
    }

    pub(super) fn segment(&self, domain: &str, id: &str) -> Option<&Expr> {
        self.segments.get(&key(domain, id))
    }
}

/// Evaluation context: one row, or a group of rows for aggregates
#[derive(Clone, Copy)]
pub(super) enum Scope<'r> {
    Row(&'r Row),
    Group(&'r [&'r Row]),
}

pub(super) struct Evaluator<'a> {
    pub(super) definitions: &'a Definitions,
}

fn failure(message: impl Into<String>) -> AnalysisError {
    AnalysisError::Computation(message.into())
}

impl<'a> Evaluator<'a> {
    pub(super) fn eval(&self, expr: &Expr, scope: Scope<'_>) -> AnalysisResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Reference(r) if r.kind == RefKind::Metric => {
                let definition = self
                    .definitions
                    .metrics
                    .get(&key(&r.domain.id, &r.target.id))
                    .ok_or_else(|| failure(format!("metric '{}' has no definition", r.target.id)))?;
                self.eval(definition, scope)
            }
            Expr::Reference(r) => match scope {
                Scope::Row(row) => self.reference(r, row),
                Scope::Group(rows) => match rows.first() {
                    Some(row) => self.reference(r, row),
                    None => Ok(Value::Null),
                },
            },
            Expr::Call { func, args } if AGGREGATES.contains(&func.as_str()) => match scope {
                Scope::Group(rows) => self.aggregate(func, args, rows),
                Scope::Row(_) => Err(failure(format!("aggregate '{}' outside of a group", func))),
            },
            Expr::Call { func, args } if func == SORT_ASC || func == SORT_DESC => match args.first() {
                Some(inner) => self.eval(inner, scope),
                None => Ok(Value::Null),
            },
            Expr::Call { func, args } => {
                let arg = match args.first() {
                    Some(a) => self.eval(a, scope)?,
                    None => Value::Null,
                };
                scalar(func, arg)
            }
            Expr::Binary {
                op: BinaryOp::In,
                lhs,
                rhs,
            } => {
                let value = self.eval(lhs, scope)?;
                let items = match rhs.as_ref() {
                    Expr::Set(items) => items,
                    other => std::slice::from_ref(other),
                };
                for item in items {
                    if matches_values(&value, &self.eval(item, scope)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                // short-circuit before evaluating the right side
                match (op, truthy(&lhs)) {
                    (BinaryOp::And, false) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs = self.eval(rhs, scope)?;
                binary(*op, &lhs, &rhs)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                    UnaryOp::Neg => match value {
                        Value::Integer(i) => Value::Integer(-i),
                        other => other.as_f64().map(|n| Value::Number(-n)).unwrap_or(Value::Null),
                    },
                })
            }
            Expr::Compose { inner, .. } => self.eval(inner, scope),
            Expr::Set(_) => Err(failure("a set can only appear on the right of IN")),
            Expr::Path(_) | Expr::Scoped { .. } => Err(failure("unresolved expression")),
        }
    }

    /// Evaluate a boolean condition on one row
    pub(super) fn test(&self, expr: &Expr, row: &Row) -> AnalysisResult<bool> {
        Ok(truthy(&self.eval(expr, Scope::Row(row))?))
    }

    fn reference(&self, r: &Reference, row: &Row) -> AnalysisResult<Value> {
        let id = key(&r.domain.id, &r.target.id);
        match r.kind {
            RefKind::Column => Ok(row.get(&r.target.id).cloned().unwrap_or(Value::Null)),
            RefKind::Dimension => match self.definitions.dimensions.get(&id) {
                Some(definition) => self.eval(definition, Scope::Row(row)),
                None => Ok(row.get(&r.target.id).cloned().unwrap_or(Value::Null)),
            },
            RefKind::Segment => {
                let definition = self
                    .definitions
                    .segments
                    .get(&id)
                    .ok_or_else(|| failure(format!("segment '{}' has no definition", r.target.id)))?;
                self.eval(definition, Scope::Row(row))
            }
            RefKind::Metric | RefKind::Domain => {
                Err(failure(format!("'{}' cannot be evaluated on a row", r.target.name)))
            }
        }
    }

    fn aggregate(&self, func: &str, args: &[Expr], rows: &[&Row]) -> AnalysisResult<Value> {
        let arg = match args.first() {
            Some(arg) => arg,
            None if func == "count" => return Ok(Value::Integer(rows.len() as i64)),
            None => return Err(failure(format!("{}() needs an argument", func))),
        };

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let value = self.eval(arg, Scope::Row(row))?;
            if !value.is_null() {
                values.push(value);
            }
        }

        Ok(match func {
            "count" => Value::Integer(values.len() as i64),
            "count_distinct" => {
                let distinct: HashSet<String> = values.iter().map(Value::key).collect();
                Value::Integer(distinct.len() as i64)
            }
            "sum" => sum(&values),
            "avg" => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            "min" => extreme(values, Ordering::Less),
            "max" => extreme(values, Ordering::Greater),
            other => return Err(failure(format!("unknown aggregate '{}'", other))),
        })
    }
}

fn sum(values: &[Value]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        let total = values
            .iter()
            .filter_map(|v| match v {
                Value::Integer(i) => Some(*i),
                _ => None,
            })
            .fold(0i64, |acc, i| acc.saturating_add(i));
        return Value::Integer(total);
    }
    Value::Number(values.iter().filter_map(Value::as_f64).sum())
}

/// Smallest (`Less`) or largest (`Greater`) of mutually orderable values
pub(super) fn extreme(values: Vec<Value>, wanted: Ordering) -> Value {
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .reduce(|best, v| {
            if compare_values(&v, &best) == Some(wanted) {
                v
            } else {
                best
            }
        })
        .unwrap_or(Value::Null)
}

pub(super) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Integer(i) => *i != 0,
        Value::Number(n) => *n != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::Date(_) | Value::Timestamp(_) => true,
    }
}

/// Compare, reading text as a date or timestamp when the other side is temporal
pub(super) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    a.compare(b).or_else(|| match (a, b) {
        (Value::Text(s), other) if other.as_millis().is_some() => {
            Value::parse_temporal(s)?.compare(other)
        }
        (other, Value::Text(s)) if other.as_millis().is_some() => {
            other.compare(&Value::parse_temporal(s)?)
        }
        _ => None,
    })
}

pub(super) fn matches_values(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> AnalysisResult<Value> {
    let compare = || compare_values(lhs, rhs);
    Ok(match op {
        BinaryOp::And => Value::Bool(truthy(lhs) && truthy(rhs)),
        BinaryOp::Or => Value::Bool(truthy(lhs) || truthy(rhs)),
        BinaryOp::Eq => Value::Bool(!lhs.is_null() && matches_values(lhs, rhs)),
        BinaryOp::Ne => Value::Bool(!lhs.is_null() && !matches_values(lhs, rhs)),
        BinaryOp::Lt => Value::Bool(compare() == Some(Ordering::Less)),
        BinaryOp::Lte => Value::Bool(matches!(compare(), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => Value::Bool(compare() == Some(Ordering::Greater)),
        BinaryOp::Gte => {
            Value::Bool(matches!(compare(), Some(Ordering::Greater | Ordering::Equal)))
        }
        BinaryOp::In => Value::Bool(matches_values(lhs, rhs)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, lhs, rhs),
    })
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            _ => None,
        };
        if let Some(result) = exact {
            return Value::Integer(result);
        }
    }
    let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Value::Null,
    };
    match op {
        BinaryOp::Add => Value::Number(a + b),
        BinaryOp::Sub => Value::Number(a - b),
        BinaryOp::Mul => Value::Number(a * b),
        BinaryOp::Div if b == 0.0 => Value::Null,
        _ => Value::Number(a / b),
    }
}

fn scalar(func: &str, value: Value) -> AnalysisResult<Value> {
    let date = |v: &Value| match v {
        Value::Date(d) => Some(*d),
        Value::Timestamp(t) => Some(t.date_naive()),
        Value::Text(s) => match Value::parse_temporal(s) {
            Some(Value::Date(d)) => Some(d),
            Some(Value::Timestamp(t)) => Some(t.date_naive()),
            _ => None,
        },
        _ => None,
    };
    Ok(match func {
        "year" => date(&value).map(|d| Value::Integer(d.year() as i64)).unwrap_or(Value::Null),
        "month" => date(&value).map(|d| Value::Integer(d.month() as i64)).unwrap_or(Value::Null),
        "lower" => match value {
            Value::Text(s) => Value::Text(s.to_lowercase()),
            other => other,
        },
        "upper" => match value {
            Value::Text(s) => Value::Text(s.to_uppercase()),
            other => other,
        },
        other => return Err(failure(format!("unknown function '{}'", other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::catalog;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn rows() -> Vec<Row> {
        vec![
            row(&[("country", "France".into()), ("amount", Value::Integer(150))]),
            row(&[("country", "France".into()), ("amount", Value::Number(20.5))]),
            row(&[("country", "Spain".into()), ("amount", Value::Null)]),
        ]
    }

    #[test]
    fn test_row_conditions() {
        let catalog = catalog();
        let definitions = Definitions::compile(&catalog).unwrap();
        let evaluator = Evaluator {
            definitions: &definitions,
        };
        let data = rows();

        let filter = catalog
            .parse("'Country' IN {\"Spain\", \"Italy\"} OR 'Big Orders'", Some("sales"))
            .unwrap();
        let kept: Vec<bool> = data.iter().map(|r| evaluator.test(&filter, r).unwrap()).collect();
        assert_eq!(kept, vec![true, false, true]);
    }

    #[test]
    fn test_group_aggregates() {
        let catalog = catalog();
        let definitions = Definitions::compile(&catalog).unwrap();
        let evaluator = Evaluator {
            definitions: &definitions,
        };
        let data = rows();
        let group: Vec<&Row> = data.iter().collect();

        let revenue = catalog.parse("revenue", Some("sales")).unwrap();
        assert_eq!(evaluator.eval(&revenue, Scope::Group(&group)).unwrap(), Value::Number(170.5));

        let ratio = catalog.parse("count(amount) / count()", Some("sales")).unwrap();
        let value = evaluator.eval(&ratio, Scope::Group(&group)).unwrap();
        assert!((value.as_f64().unwrap() - 2.0 / 3.0).abs() < 1e-9);

        let distinct = catalog.parse("count_distinct(country)", Some("sales")).unwrap();
        assert_eq!(evaluator.eval(&distinct, Scope::Group(&group)).unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_aggregate_on_row_fails() {
        let catalog = catalog();
        let definitions = Definitions::compile(&catalog).unwrap();
        let evaluator = Evaluator {
            definitions: &definitions,
        };
        let expr = catalog.parse("sum(amount) > 1", Some("sales")).unwrap();
        assert!(evaluator.test(&expr, &rows()[0]).is_err());
    }

    #[test]
    fn test_text_against_temporal() {
        let day = Value::parse_temporal("2024-03-01").unwrap();
        assert!(matches_values(&Value::from("2024-03-01"), &day));
        assert_eq!(
            compare_values(&day, &Value::from("2024-02-01")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            extreme(vec![Value::Integer(3), Value::Null, Value::Integer(9)], Ordering::Greater),
            Value::Integer(9)
        );
    }
}

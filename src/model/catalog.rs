//! In-memory catalog
//!
//! A serde-loadable set of domains (columns, dimensions, metrics, segments)
//! that resolves parsed expressions into typed references.

use serde::{Deserialize, Serialize};

use super::ast::{Expr, Name, Ref, RefKind, Reference, AGGREGATES, SCALARS, SORT_ASC, SORT_DESC};
use super::error::{ScopeError, ScopeResult};
use super::parser::parse_expression;
use super::types::ValueType;
use super::SemanticModel;

/// A raw physical attribute of a domain's rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
}

/// A groupable axis of a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Definition over columns; defaults to the column named like the id
    #[serde(default)]
    pub expression: Option<String>,
    pub value_type: ValueType,
    /// Continuous dimensions are projected as (min, max) ranges
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Whether the dimension's values are fully indexed
    #[serde(default = "default_true")]
    pub indexed: bool,
    /// Parent dimension id in the domain hierarchy
    #[serde(default)]
    pub parent: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Dimension {
    pub fn new(id: impl Into<String>, name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            expression: None,
            value_type,
            continuous: false,
            visible: true,
            indexed: true,
            parent: None,
        }
    }

    /// Builder method: mark as continuous
    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    /// Builder method: mark as not fully indexed
    pub fn unindexed(mut self) -> Self {
        self.indexed = false;
        self
    }

    /// Builder method: hide from auto-detection
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Builder method: set parent dimension
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Builder method: set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_temporal(&self) -> bool {
        self.value_type == ValueType::Temporal
    }
}

/// A named aggregate of a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub expression: String,
}

impl MetricDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            expression: expression.into(),
        }
    }

    /// Builder method: set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, reusable boolean filter of a domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub expression: String,
}

/// A queryable domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Domain {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            columns: Vec::new(),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            segments: Vec::new(),
        }
    }

    /// Builder method: add a raw column
    pub fn column(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            value_type,
        });
        self
    }

    /// Builder method: add a dimension
    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Builder method: add a metric
    pub fn metric(mut self, metric: MetricDef) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Builder method: add a named segment
    pub fn segment(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.segments.push(Segment {
            id: id.into(),
            name: name.into(),
            expression: expression.into(),
        });
        self
    }

    pub fn to_ref(&self) -> Ref {
        Ref::new(&self.id, &self.name)
    }

    pub fn find_dimension(&self, id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    pub fn find_metric(&self, id: &str) -> Option<&MetricDef> {
        self.metrics.iter().find(|m| m.id == id)
    }

    /// Find a segment by id, falling back to its display name
    pub fn find_segment(&self, key: &str) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.id == key)
            .or_else(|| self.segments.iter().find(|s| s.name == key))
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Dimensions in hierarchy order: each root followed depth-first by its children
    pub fn hierarchy(&self) -> Vec<&Dimension> {
        let mut ordered = Vec::with_capacity(self.dimensions.len());
        let roots = self.dimensions.iter().filter(|d| {
            d.parent
                .as_deref()
                .map(|p| self.find_dimension(p).is_none())
                .unwrap_or(true)
        });
        for root in roots {
            self.visit(root, &mut ordered);
        }
        ordered
    }

    fn visit<'a>(&'a self, dimension: &'a Dimension, ordered: &mut Vec<&'a Dimension>) {
        if ordered.iter().any(|d| d.id == dimension.id) {
            return;
        }
        ordered.push(dimension);
        for child in self
            .dimensions
            .iter()
            .filter(|d| d.parent.as_deref() == Some(dimension.id.as_str()))
        {
            self.visit(child, ordered);
        }
    }

    /// First visible continuous temporal dimension in hierarchy order
    pub fn find_period_dimension(&self) -> Option<&Dimension> {
        self.hierarchy()
            .into_iter()
            .find(|d| d.visible && d.continuous && d.is_temporal())
    }

    fn matches(name: &Name, id: &str, display: &str) -> bool {
        match name {
            Name::Id(s) => s == id,
            Name::Ident(s) => s == display || s == id,
        }
    }

    /// Resolve a single name within this domain
    fn lookup(&self, name: &Name, columns_only: bool) -> Option<Reference> {
        let domain = self.to_ref();
        let reference = |kind, id: &str, display: &str, value_type, continuous| Reference {
            kind,
            domain: domain.clone(),
            target: Ref::new(id, display),
            value_type,
            continuous,
        };

        if !columns_only {
            if let Some(d) = self.dimensions.iter().find(|d| Self::matches(name, &d.id, &d.name)) {
                return Some(reference(RefKind::Dimension, &d.id, &d.name, d.value_type, d.continuous));
            }
            if let Some(m) = self.metrics.iter().find(|m| Self::matches(name, &m.id, &m.name)) {
                return Some(reference(RefKind::Metric, &m.id, &m.name, ValueType::Numeric, false));
            }
            if let Some(s) = self.segments.iter().find(|s| Self::matches(name, &s.id, &s.name)) {
                return Some(reference(RefKind::Segment, &s.id, &s.name, ValueType::Boolean, false));
            }
        }
        self.columns
            .iter()
            .find(|c| Self::matches(name, &c.name, &c.name))
            .map(|c| reference(RefKind::Column, &c.name, &c.name, c.value_type, false))
    }
}

/// The set of domains visible to a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub domains: Vec<Domain>,
}

impl Catalog {
    pub fn new(domains: Vec<Domain>) -> Self {
        Self { domains }
    }

    /// Load a catalog from its JSON representation
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn find_domain(&self, name: &Name) -> Option<&Domain> {
        self.domains
            .iter()
            .find(|d| Domain::matches(name, &d.id, &d.name))
    }

    /// Parse a definition stored on a dimension, resolving names to raw columns
    pub fn parse_definition(&self, text: &str, domain: &str) -> ScopeResult<Expr> {
        let scope = self
            .domain(domain)
            .ok_or_else(|| ScopeError::new(format!("unknown domain '{}'", domain), text))?;
        let raw = parse_expression(text)?;
        self.resolve(raw, Some(scope), true, text)
    }

    fn resolve(
        &self,
        expr: Expr,
        scope: Option<&Domain>,
        columns_only: bool,
        text: &str,
    ) -> ScopeResult<Expr> {
        match expr {
            Expr::Path(names) => self.resolve_path(&names, scope, columns_only, text),
            Expr::Scoped { scope: names, inner } => {
                let domain = match names.as_slice() {
                    [name] => self.find_domain(name),
                    _ => None,
                }
                .ok_or_else(|| {
                    ScopeError::new(format!("'{}' is not a domain", join_names(&names)), text)
                })?;
                let inner = self.resolve(*inner, Some(domain), columns_only, text)?;
                Ok(Expr::Compose {
                    domain: domain.to_ref(),
                    inner: Box::new(inner),
                })
            }
            Expr::Call { func, args } => {
                let known = AGGREGATES.contains(&func.as_str())
                    || SCALARS.contains(&func.as_str())
                    || func == SORT_ASC
                    || func == SORT_DESC;
                if !known {
                    return Err(ScopeError::new(format!("unknown function '{}'", func), text));
                }
                let args = args
                    .into_iter()
                    .map(|a| self.resolve(a, scope, columns_only, text))
                    .collect::<ScopeResult<Vec<_>>>()?;
                Ok(Expr::Call { func, args })
            }
            Expr::Binary { op, lhs, rhs } => Ok(Expr::Binary {
                op,
                lhs: Box::new(self.resolve(*lhs, scope, columns_only, text)?),
                rhs: Box::new(self.resolve(*rhs, scope, columns_only, text)?),
            }),
            Expr::Unary { op, operand } => Ok(Expr::Unary {
                op,
                operand: Box::new(self.resolve(*operand, scope, columns_only, text)?),
            }),
            Expr::Set(items) => Ok(Expr::Set(
                items
                    .into_iter()
                    .map(|i| self.resolve(i, scope, columns_only, text))
                    .collect::<ScopeResult<Vec<_>>>()?,
            )),
            resolved => Ok(resolved),
        }
    }

    fn resolve_path(
        &self,
        names: &[Name],
        scope: Option<&Domain>,
        columns_only: bool,
        text: &str,
    ) -> ScopeResult<Expr> {
        let unknown = || ScopeError::new(format!("unknown reference {}", join_names(names)), text);

        match names {
            [name] => {
                if let Some(found) = scope.and_then(|d| d.lookup(name, columns_only)) {
                    return Ok(Expr::Reference(found));
                }
                let domain = self.find_domain(name).ok_or_else(unknown)?;
                Ok(Expr::Reference(Reference {
                    kind: RefKind::Domain,
                    domain: domain.to_ref(),
                    target: domain.to_ref(),
                    value_type: ValueType::Any,
                    continuous: false,
                }))
            }
            [domain, name] => {
                let domain = self.find_domain(domain).ok_or_else(unknown)?;
                domain
                    .lookup(name, columns_only)
                    .map(Expr::Reference)
                    .ok_or_else(unknown)
            }
            _ => Err(unknown()),
        }
    }
}

fn join_names(names: &[Name]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n.text()))
        .collect::<Vec<_>>()
        .join(".")
}

impl SemanticModel for Catalog {
    fn domain(&self, id: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.id == id)
    }

    fn parse(&self, text: &str, scope: Option<&str>) -> ScopeResult<Expr> {
        let scope = match scope {
            Some(id) => Some(
                self.domain(id)
                    .ok_or_else(|| ScopeError::new(format!("unknown domain '{}'", id), text))?,
            ),
            None => None,
        };
        let raw = parse_expression(text)?;
        self.resolve(raw, scope, false, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::printer::{print_global, Style};

    fn catalog() -> Catalog {
        Catalog::new(vec![Domain::new("sales", "Sales")
            .column("country", ValueType::Text)
            .column("amount", ValueType::Numeric)
            .column("order_date", ValueType::Temporal)
            .dimension(Dimension::new("country", "Country", ValueType::Text))
            .dimension(
                Dimension::new("order_date", "Order Date", ValueType::Temporal)
                    .continuous()
                    .parent("country"),
            )
            .metric(MetricDef::new("revenue", "Revenue", "sum(amount)"))
            .segment("big", "Big Orders", "amount > 100")])
    }

    #[test]
    fn test_resolve_by_name_and_id() {
        let catalog = catalog();
        let by_name = catalog.parse("'Country'", Some("sales")).unwrap();
        let by_id = catalog.parse("@'country'", Some("sales")).unwrap();
        assert_eq!(by_name, by_id);
        assert_eq!(by_name.as_dimension().unwrap().target.id, "country");
    }

    #[test]
    fn test_resolve_domain_reference() {
        let catalog = catalog();
        let expr = catalog.parse("'Sales'", None).unwrap();
        assert_eq!(expr.as_reference().unwrap().kind, RefKind::Domain);
    }

    #[test]
    fn test_resolve_global_round_trip() {
        let catalog = catalog();
        let expr = catalog.parse("sum(amount) / count()", Some("sales")).unwrap();
        let composed = Expr::Compose {
            domain: catalog.domain("sales").unwrap().to_ref(),
            inner: Box::new(expr),
        };
        let text = print_global(&composed, Style::Robot);
        assert_eq!(text, "@'sales'.(sum(@'amount') / count())");

        let reparsed = catalog.parse(&text, None).unwrap();
        assert_eq!(print_global(&reparsed, Style::Robot), text);
    }

    #[test]
    fn test_unknown_reference() {
        let catalog = catalog();
        let err = catalog.parse("'Nope' = 1", Some("sales")).unwrap_err();
        assert!(err.message.contains("unknown reference"));
        assert!(catalog.parse("frobnicate(1)", Some("sales")).is_err());
    }

    #[test]
    fn test_parse_definition_prefers_columns() {
        let catalog = catalog();
        let expr = catalog.parse_definition("country", "sales").unwrap();
        assert_eq!(expr.as_reference().unwrap().kind, RefKind::Column);
    }

    #[test]
    fn test_period_detection_walks_hierarchy() {
        let catalog = catalog();
        let domain = catalog.domain("sales").unwrap();
        let order: Vec<_> = domain.hierarchy().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["country", "order_date"]);
        assert_eq!(domain.find_period_dimension().unwrap().id, "order_date");
    }

    #[test]
    fn test_segment_lookup() {
        let catalog = catalog();
        let domain = catalog.domain("sales").unwrap();
        assert_eq!(domain.find_segment("Big Orders").unwrap().id, "big");
        let expr = catalog.parse("'Big Orders'", Some("sales")).unwrap();
        assert!(expr.expr_type().is_boolean());
    }
}

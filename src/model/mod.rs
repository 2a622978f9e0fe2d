//! Semantic Model
//!
//! The expression layer the pipeline consumes:
//!
//! - **AST**: expression tree and type classification
//! - **Parser**: expression text into an unresolved AST
//! - **Printer**: style-dependent pretty printing
//! - **Catalog**: in-memory domains that resolve references
//!
//! The rest of the crate only depends on the [`SemanticModel`] trait; the
//! [`Catalog`] is the reference implementation used by the CLI and tests.

mod ast;
mod catalog;
mod error;
mod parser;
mod printer;
mod types;

pub use ast::{
    BinaryOp, Expr, Name, Ref, RefKind, Reference, UnaryOp, AGGREGATES, SCALARS, SORT_ASC,
    SORT_DESC,
};
pub use catalog::{Catalog, Column, Dimension, Domain, MetricDef, Segment};
pub use error::{ScopeError, ScopeResult};
pub use parser::parse_expression;
pub use printer::{print, print_global, Style};
pub use types::{quote_string, ExprType, Value, ValueType};

/// Expression parsing and resolution consumed by every compilation stage
pub trait SemanticModel: Send + Sync {
    /// Look up a domain by id
    fn domain(&self, id: &str) -> Option<&Domain>;

    /// Parse and resolve expression text within an optional domain scope
    fn parse(&self, text: &str, scope: Option<&str>) -> ScopeResult<Expr>;

    /// Resolve text that must designate a domain
    fn resolve_domain(&self, text: &str) -> ScopeResult<&Domain> {
        let expr = self.parse(text, None)?;
        match expr.as_reference() {
            Some(r) if r.kind == RefKind::Domain => self
                .domain(&r.domain.id)
                .ok_or_else(|| ScopeError::new("unknown domain", text)),
            _ => Err(ScopeError::new("expression is not a domain", text)),
        }
    }

    /// Pretty print an expression in a display style
    fn pretty_print(&self, expr: &Expr, style: Style, scope: Option<&str>) -> String {
        print(expr, style, scope)
    }
}

//! Expression Abstract Syntax Tree
//!
//! The parser produces unresolved `Path` and `Scoped` nodes; resolution against a
//! domain replaces them with `Reference` and `Compose` nodes carrying the ids,
//! display names and types needed downstream, so later stages never go back
//! to the catalog just to print or classify an expression.
//!
//! # Example Expressions
//!
//! ```text
//! 'Country' = "France"
//! @'country' IN {"France", "Spain"}
//! @'sales'.sum(@'amount') / count()
//! DESC('Revenue')
//! ```

use super::types::{ExprType, Value, ValueType};
use serde::Serialize;

/// One segment of a reference path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Name {
    /// Plain or single-quoted identifier, matched against names then ids
    Ident(String),
    /// `@'id'` reference, matched against ids only
    Id(String),
}

impl Name {
    pub fn text(&self) -> &str {
        match self {
            Name::Ident(s) | Name::Id(s) => s,
        }
    }
}

/// Id and display name of a catalog object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Ref {
    pub id: String,
    pub name: String,
}

impl Ref {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What a resolved reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Domain,
    Dimension,
    Metric,
    Column,
    Segment,
}

/// A reference resolved against the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub kind: RefKind,
    pub domain: Ref,
    pub target: Ref,
    pub value_type: ValueType,
    pub continuous: bool,
}

/// Binary operators, in ascending precedence groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "OR",
            Self::And => "AND",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "IN",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    /// Binding strength used by the printer to decide on parentheses
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte | Self::In => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div => 5,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 3
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Self::Or | Self::And)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Sort direction wrapper functions
pub const SORT_ASC: &str = "asc";
pub const SORT_DESC: &str = "desc";

/// Aggregate function names
pub const AGGREGATES: &[&str] = &["count", "count_distinct", "sum", "avg", "min", "max"];

/// Scalar function names understood by the reference model
pub const SCALARS: &[&str] = &["year", "month", "lower", "upper"];

/// An expression node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Literal(Value),
    /// Unresolved reference path (`'Sales'.'Country'`)
    Path(Vec<Name>),
    /// Unresolved scoped expression (`@'sales'.sum(@'amount')`)
    Scoped { scope: Vec<Name>, inner: Box<Expr> },
    /// Resolved reference
    Reference(Reference),
    /// Function call; the name is stored lowercase
    Call { func: String, args: Vec<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Literal set, right-hand side of `IN`
    Set(Vec<Expr>),
    /// Expression evaluated within an explicit domain
    Compose { domain: Ref, inner: Box<Expr> },
}

impl Expr {
    pub fn call(func: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: func.to_lowercase(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Returns the sort wrapper direction and the wrapped expression, if any
    pub fn sort_wrapper(&self) -> Option<(bool, &Expr)> {
        match self {
            Expr::Call { func, args } if args.len() == 1 && func == SORT_ASC => {
                Some((false, &args[0]))
            }
            Expr::Call { func, args } if args.len() == 1 && func == SORT_DESC => {
                Some((true, &args[0]))
            }
            _ => None,
        }
    }

    /// Strip an ASC/DESC wrapper
    pub fn unwrap_sort(&self) -> &Expr {
        self.sort_wrapper().map(|(_, inner)| inner).unwrap_or(self)
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Expr::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// A dimension reference, the only axis usable as a structured facet
    pub fn as_dimension(&self) -> Option<&Reference> {
        self.as_reference().filter(|r| r.kind == RefKind::Dimension)
    }

    /// Whether this node prints as an operator between several operands
    ///
    /// Composing such an expression with a domain needs parentheses.
    pub fn is_infix(&self) -> bool {
        matches!(self, Expr::Binary { .. })
    }

    /// Whether this expression is already bound to an explicit domain
    pub fn is_domain_scoped(&self) -> bool {
        match self {
            Expr::Compose { .. } => true,
            Expr::Reference(r) => r.kind == RefKind::Metric,
            _ => false,
        }
    }

    /// Classify a resolved expression
    pub fn expr_type(&self) -> ExprType {
        match self {
            Expr::Literal(v) => ExprType::scalar(v.value_type()),
            Expr::Path(_) | Expr::Scoped { .. } => ExprType::scalar(ValueType::Any),
            Expr::Reference(r) => match r.kind {
                RefKind::Metric => ExprType::aggregate(ValueType::Numeric),
                RefKind::Segment => ExprType::scalar(ValueType::Boolean),
                RefKind::Domain => ExprType::scalar(ValueType::Any),
                RefKind::Dimension | RefKind::Column => ExprType {
                    value: r.value_type,
                    aggregate: false,
                    continuous: r.continuous,
                },
            },
            Expr::Call { func, args } => {
                let arg = args.first().map(|a| a.expr_type());
                match func.as_str() {
                    "count" | "count_distinct" => ExprType::aggregate(ValueType::Numeric),
                    "sum" | "avg" => ExprType::aggregate(ValueType::Numeric),
                    "min" | "max" => {
                        ExprType::aggregate(arg.map(|t| t.value).unwrap_or(ValueType::Any))
                    }
                    SORT_ASC | SORT_DESC => arg.unwrap_or(ExprType::scalar(ValueType::Any)),
                    "year" | "month" => ExprType {
                        value: ValueType::Numeric,
                        aggregate: arg.map(|t| t.aggregate).unwrap_or(false),
                        continuous: false,
                    },
                    _ => ExprType {
                        value: ValueType::Text,
                        aggregate: arg.map(|t| t.aggregate).unwrap_or(false),
                        continuous: false,
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let aggregate = lhs.expr_type().aggregate || rhs.expr_type().aggregate;
                let value = if op.is_comparison() || op.is_logical() {
                    ValueType::Boolean
                } else {
                    ValueType::Numeric
                };
                ExprType {
                    value,
                    aggregate,
                    continuous: false,
                }
            }
            Expr::Unary { op, operand } => {
                let inner = operand.expr_type();
                let value = match op {
                    UnaryOp::Not => ValueType::Boolean,
                    UnaryOp::Neg => ValueType::Numeric,
                };
                ExprType {
                    value,
                    aggregate: inner.aggregate,
                    continuous: false,
                }
            }
            Expr::Set(items) => items
                .first()
                .map(|i| i.expr_type())
                .unwrap_or(ExprType::scalar(ValueType::Any)),
            Expr::Compose { inner, .. } => inner.expr_type(),
        }
    }
}

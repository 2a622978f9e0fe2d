//! Expression pretty printer
//!
//! Prints resolved expressions in one of the display styles:
//! `Human` uses display names (`'Country'`), `Robot` and `Legacy` use ids
//! (`@'country'`). References outside the print scope are qualified with
//! their domain; `None` scope prints everything in global form.

use super::ast::{Expr, Name, RefKind, Reference, SORT_ASC, SORT_DESC};
use serde::{Deserialize, Serialize};

/// Display style for printed expressions and output headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    #[serde(alias = "HUMAN")]
    Human,
    #[serde(alias = "ROBOT")]
    Robot,
    #[serde(alias = "LEGACY")]
    Legacy,
}

impl Style {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "robot" => Some(Self::Robot),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }

    fn uses_ids(&self) -> bool {
        !matches!(self, Style::Human)
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Robot => write!(f, "robot"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Print an expression relative to a domain scope
pub fn print(expr: &Expr, style: Style, scope: Option<&str>) -> String {
    Printer { style, scope }.expr(expr)
}

/// Print an expression with every reference qualified by its domain
pub fn print_global(expr: &Expr, style: Style) -> String {
    print(expr, style, None)
}

struct Printer<'a> {
    style: Style,
    scope: Option<&'a str>,
}

impl<'a> Printer<'a> {
    fn ident(&self, id: &str, name: &str) -> String {
        if self.style.uses_ids() {
            format!("@'{}'", id)
        } else {
            format!("'{}'", name)
        }
    }

    fn reference(&self, r: &Reference) -> String {
        let domain = self.ident(&r.domain.id, &r.domain.name);
        if r.kind == RefKind::Domain {
            return domain;
        }
        let target = self.ident(&r.target.id, &r.target.name);
        if self.scope == Some(r.domain.id.as_str()) {
            target
        } else {
            format!("{}.{}", domain, target)
        }
    }

    fn names(&self, names: &[Name]) -> String {
        names
            .iter()
            .map(|n| match n {
                Name::Id(id) => format!("@'{}'", id),
                Name::Ident(s) => format!("'{}'", s),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(v) => v.to_literal(),
            Expr::Path(names) => self.names(names),
            Expr::Scoped { scope, inner } => {
                let inner_text = self.expr(inner);
                if inner.is_infix() {
                    format!("{}.({})", self.names(scope), inner_text)
                } else {
                    format!("{}.{}", self.names(scope), inner_text)
                }
            }
            Expr::Reference(r) => self.reference(r),
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Vec<_>>()
                    .join(", ");
                let func = if func == SORT_ASC || func == SORT_DESC {
                    func.to_uppercase()
                } else {
                    func.clone()
                };
                format!("{}({})", func, args)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs_text = self.operand(lhs, op.precedence(), false);
                let rhs_text = self.operand(rhs, op.precedence(), true);
                format!("{} {} {}", lhs_text, op.symbol(), rhs_text)
            }
            Expr::Unary { op, operand } => {
                let inner = if operand.is_infix() {
                    format!("({})", self.expr(operand))
                } else {
                    self.expr(operand)
                };
                match op {
                    super::ast::UnaryOp::Not => format!("NOT {}", inner),
                    super::ast::UnaryOp::Neg => format!("-{}", inner),
                }
            }
            Expr::Set(items) => format!(
                "{{{}}}",
                items
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Expr::Compose { domain, inner } => {
                let scoped = Printer {
                    style: self.style,
                    scope: Some(domain.id.as_str()),
                };
                let inner_text = scoped.expr(inner);
                let domain_text = self.ident(&domain.id, &domain.name);
                if inner.is_infix() {
                    format!("{}.({})", domain_text, inner_text)
                } else {
                    format!("{}.{}", domain_text, inner_text)
                }
            }
        }
    }

    /// Print a binary operand, parenthesizing weaker-binding children
    fn operand(&self, expr: &Expr, parent: u8, right: bool) -> String {
        let text = self.expr(expr);
        match expr {
            Expr::Binary { op, .. }
                if op.precedence() < parent || (right && op.precedence() == parent) =>
            {
                format!("({})", text)
            }
            _ => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ast::{BinaryOp, Ref};
    use crate::model::types::{Value, ValueType};

    fn country() -> Expr {
        Expr::Reference(Reference {
            kind: RefKind::Dimension,
            domain: Ref::new("sales", "Sales"),
            target: Ref::new("country", "Country"),
            value_type: ValueType::Text,
            continuous: false,
        })
    }

    #[test]
    fn test_print_styles() {
        assert_eq!(print(&country(), Style::Human, Some("sales")), "'Country'");
        assert_eq!(print(&country(), Style::Robot, Some("sales")), "@'country'");
        assert_eq!(
            print_global(&country(), Style::Robot),
            "@'sales'.@'country'"
        );
        assert_eq!(
            print_global(&country(), Style::Human),
            "'Sales'.'Country'"
        );
    }

    #[test]
    fn test_print_compose_parenthesizes_infix() {
        let sum = Expr::call("sum", vec![Expr::Literal(Value::Integer(1))]);
        let compose = Expr::Compose {
            domain: Ref::new("sales", "Sales"),
            inner: Box::new(Expr::binary(BinaryOp::Add, sum.clone(), Expr::call("count", vec![]))),
        };
        assert_eq!(
            print_global(&compose, Style::Robot),
            "@'sales'.(sum(1) + count())"
        );

        let compose = Expr::Compose {
            domain: Ref::new("sales", "Sales"),
            inner: Box::new(sum),
        };
        assert_eq!(print_global(&compose, Style::Robot), "@'sales'.sum(1)");
    }

    #[test]
    fn test_print_binary_precedence() {
        let a = Expr::Literal(Value::Integer(1));
        let sum = Expr::binary(BinaryOp::Add, a.clone(), a.clone());
        let product = Expr::binary(BinaryOp::Mul, sum, a.clone());
        assert_eq!(print_global(&product, Style::Robot), "(1 + 1) * 1");

        let sub = Expr::binary(
            BinaryOp::Sub,
            a.clone(),
            Expr::binary(BinaryOp::Sub, a.clone(), a),
        );
        assert_eq!(print_global(&sub, Style::Robot), "1 - (1 - 1)");
    }

    #[test]
    fn test_print_sort_wrapper_and_set() {
        let desc = Expr::call("desc", vec![country()]);
        assert_eq!(print(&desc, Style::Human, Some("sales")), "DESC('Country')");

        let filter = Expr::binary(
            BinaryOp::In,
            country(),
            Expr::Set(vec![Expr::Literal("France".into()), Expr::Literal("Spain".into())]),
        );
        assert_eq!(
            print(&filter, Style::Robot, Some("sales")),
            "@'country' IN {\"France\", \"Spain\"}"
        );
    }
}

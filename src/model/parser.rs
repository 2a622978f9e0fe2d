//! Expression Parser
//!
//! Parses expression text into an unresolved `Expr` tree.
//!
//! # Supported Syntax
//!
//! ```text
//! expr     := or
//! or       := and (OR and)*
//! and      := not (AND not)*
//! not      := NOT not | cmp
//! cmp      := add ((= | != | <> | < | <= | > | >=) add | IN set)?
//! add      := mul ((+ | -) mul)*
//! mul      := unary ((* | /) unary)*
//! unary    := - unary | primary
//! primary  := number | "string" | true | false | null | set | ( expr )
//!           | func ( args ) | path [. func ( args ) | . ( expr )]
//! path     := name (. name)*
//! name     := ident | 'quoted' | @'id'
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, not, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::ast::{BinaryOp, Expr, Name, UnaryOp};
use super::error::{ScopeError, ScopeResult};
use super::types::Value;

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "true", "false", "null"];

/// Parse expression text into an unresolved AST
pub fn parse_expression(input: &str) -> ScopeResult<Expr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ScopeError::new("empty expression", input));
    }

    match ws(parse_or)(trimmed) {
        Ok((remaining, expr)) => {
            if remaining.trim().is_empty() {
                Ok(expr)
            } else {
                let position = trimmed.len() - remaining.len();
                Err(ScopeError::new(
                    format!("unexpected input '{}'", remaining.trim()),
                    input,
                )
                .at(position))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let position = trimmed.len() - e.input.len();
            Err(ScopeError::new("syntax error", input).at(position))
        }
        Err(nom::Err::Incomplete(_)) => Err(ScopeError::new("incomplete expression", input)),
    }
}

/// Wrap a parser with optional surrounding whitespace
fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Match a case-insensitive keyword on a word boundary
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(peek(satisfy(is_ident_char))))
}

/// Fold a left-associative chain of binary operations
fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |lhs, (op, rhs)| Expr::binary(op, lhs, rhs))
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(pair(value(BinaryOp::Or, ws(keyword("or"))), parse_and))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_not(input)?;
    let (input, rest) = many0(pair(value(BinaryOp::And, ws(keyword("and"))), parse_not))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn parse_not(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(keyword("not")), parse_not), |operand| Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }),
        parse_comparison,
    ))(input)
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = parse_additive(input)?;

    if let Ok((rest, set)) = preceded(ws(keyword("in")), parse_set)(input) {
        return Ok((rest, Expr::binary(BinaryOp::In, lhs, set)));
    }

    let (input, rhs) = opt(pair(ws(parse_comparison_op), parse_additive))(input)?;
    Ok((
        input,
        match rhs {
            Some((op, rhs)) => Expr::binary(op, lhs, rhs),
            None => lhs,
        },
    ))
}

fn parse_comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Ne, alt((tag("!="), tag("<>")))),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Eq, alt((tag("=="), tag("=")))),
    ))(input)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_multiplicative(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        ))),
        parse_multiplicative,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
        ))),
        parse_unary,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), parse_unary), |operand| match operand {
            Expr::Literal(Value::Integer(i)) => Expr::Literal(Value::Integer(-i)),
            Expr::Literal(Value::Number(n)) => Expr::Literal(Value::Number(-n)),
            operand => Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            },
        }),
        ws(parse_primary),
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(parse_number, Expr::Literal),
        map(parse_string, |s| Expr::Literal(Value::Text(s))),
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        value(Expr::Literal(Value::Null), keyword("null")),
        parse_set,
        delimited(char('('), ws(parse_or), char(')')),
        parse_call,
        parse_path,
    ))(input)
}

/// Parse `{a, b, c}`
fn parse_set(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            ws(char('{')),
            separated_list0(ws(char(',')), parse_or),
            ws(char('}')),
        ),
        Expr::Set,
    )(input)
}

/// Parse `func(args)`
fn parse_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = parse_bare_identifier(input)?;
    let (input, args) = parse_arguments(input)?;
    Ok((input, Expr::call(name, args)))
}

fn parse_arguments(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), parse_or),
        ws(char(')')),
    )(input)
}

/// Parse a reference path, optionally ending in a scoped call or parenthesized expression
fn parse_path(input: &str) -> IResult<&str, Expr> {
    let (mut input, first) = parse_name(input)?;
    let mut names = vec![first];

    loop {
        let (rest, dot) = opt(ws(char('.')))(input)?;
        if dot.is_none() {
            break;
        }

        if let Ok((rest, inner)) = alt((parse_call, delimited(char('('), ws(parse_or), char(')'))))(rest) {
            return Ok((
                rest,
                Expr::Scoped {
                    scope: names,
                    inner: Box::new(inner),
                },
            ));
        }

        let (rest, name) = parse_name(rest)?;
        names.push(name);
        input = rest;
    }

    Ok((input, Expr::Path(names)))
}

fn parse_name(input: &str) -> IResult<&str, Name> {
    alt((
        map(preceded(char('@'), parse_quoted_identifier), Name::Id),
        map(parse_quoted_identifier, Name::Ident),
        map(parse_bare_identifier, |s| Name::Ident(s.to_string())),
    ))(input)
}

fn parse_bare_identifier(input: &str) -> IResult<&str, &str> {
    let (rest, ident) = recognize(pair(
        take_while1(is_ident_start),
        take_while(is_ident_char),
    ))(input)?;

    if KEYWORDS.contains(&ident.to_lowercase().as_str()) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, ident))
}

/// Parse a single-quoted identifier
fn parse_quoted_identifier(input: &str) -> IResult<&str, String> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = take_while(|c| c != '\'')(input)?;
    let (input, _) = char('\'')(input)?;
    Ok((input, content.to_string()))
}

/// Parse a double-quoted string constant with `\"` and `\\` escapes
fn parse_string(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"')(input)?;
    let mut out = String::new();

    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), out)),
            Some('\\') => match chars.next() {
                Some(c) => {
                    out.push(c);
                    rest = chars.as_str();
                }
                None => break,
            },
            Some(c) => {
                out.push(c);
                rest = chars.as_str();
            }
            None => break,
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        rest,
        nom::error::ErrorKind::Char,
    )))
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    let (input, text) = recognize(tuple((digit1, opt(pair(char('.'), digit1)))))(input)?;
    let number = if text.contains('.') {
        text.parse::<f64>().map(Value::Number).ok()
    } else {
        text.parse::<i64>().map(Value::Integer).ok()
    };

    match number {
        Some(n) => Ok((input, n)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(names: &[&str]) -> Expr {
        Expr::Path(names.iter().map(|n| Name::Ident(n.to_string())).collect())
    }

    #[test]
    fn test_parse_simple_reference() {
        assert_eq!(parse_expression("country").unwrap(), path(&["country"]));
        assert_eq!(
            parse_expression("'Sales'.'Country'").unwrap(),
            path(&["Sales", "Country"])
        );
        assert_eq!(
            parse_expression("@'country'").unwrap(),
            Expr::Path(vec![Name::Id("country".to_string())])
        );
    }

    #[test]
    fn test_parse_equality_filter() {
        let expr = parse_expression("country = \"France\"").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Eq,
                path(&["country"]),
                Expr::Literal(Value::Text("France".to_string()))
            )
        );
    }

    #[test]
    fn test_parse_in_set() {
        let expr = parse_expression("country IN {\"France\", \"Spain\"}").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::In, rhs, .. } => match *rhs {
                Expr::Set(items) => assert_eq!(items.len(), 2),
                other => panic!("expected set, got {:?}", other),
            },
            other => panic!("expected IN, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expression("a + b * 2 > 3 AND NOT c = 1").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::And, lhs, rhs } => {
                assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Gt, .. }));
                assert!(matches!(*rhs, Expr::Unary { op: UnaryOp::Not, .. }));
            }
            other => panic!("expected AND, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_calls() {
        assert_eq!(parse_expression("count()").unwrap(), Expr::call("count", vec![]));
        assert_eq!(
            parse_expression("SUM(amount)").unwrap(),
            Expr::call("sum", vec![path(&["amount"])])
        );
    }

    #[test]
    fn test_parse_scoped_call() {
        let expr = parse_expression("@'sales'.sum(@'amount')").unwrap();
        match expr {
            Expr::Scoped { scope, inner } => {
                assert_eq!(scope, vec![Name::Id("sales".to_string())]);
                assert!(matches!(*inner, Expr::Call { .. }));
            }
            other => panic!("expected scoped, got {:?}", other),
        }

        let expr = parse_expression("'Sales'.(sum(amount) + 1)").unwrap();
        assert!(matches!(expr, Expr::Scoped { .. }));
    }

    #[test]
    fn test_parse_negative_literal() {
        assert_eq!(
            parse_expression("-1").unwrap(),
            Expr::Literal(Value::Integer(-1))
        );
        assert_eq!(
            parse_expression("2.5").unwrap(),
            Expr::Literal(Value::Number(2.5))
        );
    }

    #[test]
    fn test_parse_string_escape() {
        assert_eq!(
            parse_expression(r#""a \"b\"""#).unwrap(),
            Expr::Literal(Value::Text("a \"b\"".to_string()))
        );
    }

    #[test]
    fn test_parse_case_insensitive_keywords() {
        assert!(parse_expression("a = 1 and b = 2 or not c").is_ok());
        assert!(parse_expression("x in {1, 2}").is_ok());
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_expression("country = ").unwrap_err();
        assert!(err.position.is_some());

        let err = parse_expression("a b").unwrap_err();
        assert_eq!(err.position, Some(2));
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_expression("   ").is_err());
    }
}

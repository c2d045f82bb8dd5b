//! `{...}` bindings.
//!
//! The text between the braces is parsed with oxc and lowered into an owned
//! tree, so the arena can be dropped right after parsing. Bare identifiers
//! resolve as keys on the context object.

use std::collections::HashSet;

use oxc_allocator::Allocator;
use oxc_ast::ast::{Expression, IdentifierReference};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::{BinaryOperator, LogicalOperator, UnaryOperator};

use super::Scope;
use crate::value::{as_f64, get_key, is_truthy, loose_equals, number, to_display_string, Value};

lazy_static::lazy_static! {
    static ref LITERAL_NAMES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("undefined");
        s.insert("NaN");
        s.insert("Infinity");
        s
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Key(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Plus(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Template(Vec<TemplatePart>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

struct KeyCollector {
    keys: Vec<String>,
}

impl<'a> Visit<'a> for KeyCollector {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        let name = ident.name.as_str();
        if !LITERAL_NAMES.contains(name) && !self.keys.iter().any(|k| k == name) {
            self.keys.push(name.to_string());
        }
    }
}

/// Parses `source` into an owned tree plus the context keys it reads.
pub(crate) fn parse_expression(source: &str) -> Result<(Expr, Vec<String>), String> {
    let allocator = Allocator::default();
    let source_type = SourceType::default();
    let parsed = Parser::new(&allocator, source, source_type).parse_expression();

    match parsed {
        Ok(expr) => {
            let mut collector = KeyCollector { keys: Vec::new() };
            collector.visit_expression(&expr);
            Ok((lower(&expr)?, collector.keys))
        }
        Err(errors) => Err(format!("invalid expression syntax: {:?}", errors)),
    }
}

fn boxed(expr: &Expression<'_>) -> Result<Box<Expr>, String> {
    lower(expr).map(Box::new)
}

fn lower(expr: &Expression<'_>) -> Result<Expr, String> {
    match expr {
        Expression::NumericLiteral(n) => Ok(Expr::Literal(number(n.value))),
        Expression::StringLiteral(s) => Ok(Expr::Literal(Value::String(s.value.to_string()))),
        Expression::BooleanLiteral(b) => Ok(Expr::Literal(Value::Bool(b.value))),
        Expression::NullLiteral(_) => Ok(Expr::Literal(Value::Null)),
        Expression::Identifier(ident) => match ident.name.as_str() {
            "undefined" | "NaN" => Ok(Expr::Literal(Value::Null)),
            "Infinity" => Err("Infinity cannot be represented".to_string()),
            name => Ok(Expr::Key(name.to_string())),
        },
        Expression::StaticMemberExpression(member) => Ok(Expr::Member(
            boxed(&member.object)?,
            member.property.name.to_string(),
        )),
        Expression::ComputedMemberExpression(member) => Ok(Expr::Index(
            boxed(&member.object)?,
            boxed(&member.expression)?,
        )),
        Expression::ParenthesizedExpression(paren) => lower(&paren.expression),
        Expression::UnaryExpression(unary) => {
            let argument = boxed(&unary.argument)?;
            match unary.operator {
                UnaryOperator::LogicalNot => Ok(Expr::Not(argument)),
                UnaryOperator::UnaryNegation => Ok(Expr::Neg(argument)),
                UnaryOperator::UnaryPlus => Ok(Expr::Plus(argument)),
                other => Err(format!("unsupported operator {:?}", other)),
            }
        }
        Expression::BinaryExpression(binary) => {
            let op = match binary.operator {
                BinaryOperator::Addition => BinaryOp::Add,
                BinaryOperator::Subtraction => BinaryOp::Sub,
                BinaryOperator::Multiplication => BinaryOp::Mul,
                BinaryOperator::Division => BinaryOp::Div,
                BinaryOperator::Remainder => BinaryOp::Rem,
                BinaryOperator::Equality => BinaryOp::Eq,
                BinaryOperator::Inequality => BinaryOp::Ne,
                BinaryOperator::StrictEquality => BinaryOp::StrictEq,
                BinaryOperator::StrictInequality => BinaryOp::StrictNe,
                BinaryOperator::LessThan => BinaryOp::Lt,
                BinaryOperator::LessEqualThan => BinaryOp::Le,
                BinaryOperator::GreaterThan => BinaryOp::Gt,
                BinaryOperator::GreaterEqualThan => BinaryOp::Ge,
                other => return Err(format!("unsupported operator {:?}", other)),
            };
            Ok(Expr::Binary(op, boxed(&binary.left)?, boxed(&binary.right)?))
        }
        Expression::LogicalExpression(logical) => {
            let left = boxed(&logical.left)?;
            let right = boxed(&logical.right)?;
            Ok(match logical.operator {
                LogicalOperator::And => Expr::And(left, right),
                LogicalOperator::Or => Expr::Or(left, right),
                LogicalOperator::Coalesce => Expr::Coalesce(left, right),
            })
        }
        Expression::ConditionalExpression(cond) => Ok(Expr::Conditional(
            boxed(&cond.test)?,
            boxed(&cond.consequent)?,
            boxed(&cond.alternate)?,
        )),
        Expression::ArrayExpression(array) => {
            let mut items = Vec::with_capacity(array.elements.len());
            for element in &array.elements {
                let item = element
                    .as_expression()
                    .ok_or_else(|| "array holes and spreads are not supported".to_string())?;
                items.push(lower(item)?);
            }
            Ok(Expr::Array(items))
        }
        Expression::TemplateLiteral(template) => {
            let mut parts = Vec::new();
            for (i, quasi) in template.quasis.iter().enumerate() {
                let text = match &quasi.value.cooked {
                    Some(cooked) => cooked.to_string(),
                    None => quasi.value.raw.to_string(),
                };
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(text));
                }
                if let Some(expr) = template.expressions.get(i) {
                    parts.push(TemplatePart::Expr(lower(expr)?));
                }
            }
            Ok(Expr::Template(parts))
        }
        _ => Err("unsupported expression syntax".to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATION
// ═══════════════════════════════════════════════════════════════════════════════

fn numeric(value: &Value) -> Result<f64, String> {
    as_f64(value).ok_or_else(|| format!("{} is not a number", value))
}

impl Expr {
    pub fn eval(&self, scope: &mut Scope<'_>) -> Result<Value, String> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Key(key) => scope.value_for_key(key).map_err(|e| e.to_string()),
            Expr::Member(object, name) => {
                Ok(get_key(&object.eval(scope)?, name).unwrap_or(Value::Null))
            }
            Expr::Index(object, index) => {
                let object = object.eval(scope)?;
                let key = to_display_string(&index.eval(scope)?);
                Ok(get_key(&object, &key).unwrap_or(Value::Null))
            }
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.eval(scope)?))),
            Expr::Neg(inner) => Ok(number(-numeric(&inner.eval(scope)?)?)),
            Expr::Plus(inner) => Ok(number(numeric(&inner.eval(scope)?)?)),
            Expr::Binary(op, left, right) => {
                let left = left.eval(scope)?;
                let right = right.eval(scope)?;
                binary(*op, &left, &right)
            }
            Expr::And(left, right) => {
                let left = left.eval(scope)?;
                if is_truthy(&left) {
                    right.eval(scope)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = left.eval(scope)?;
                if is_truthy(&left) {
                    Ok(left)
                } else {
                    right.eval(scope)
                }
            }
            Expr::Coalesce(left, right) => match left.eval(scope)? {
                Value::Null => right.eval(scope),
                value => Ok(value),
            },
            Expr::Conditional(test, consequent, alternate) => {
                if is_truthy(&test.eval(scope)?) {
                    consequent.eval(scope)
                } else {
                    alternate.eval(scope)
                }
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| item.eval(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(s) => text.push_str(s),
                        TemplatePart::Expr(e) => text.push_str(&to_display_string(&e.eval(scope)?)),
                    }
                }
                Ok(Value::String(text))
            }
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                Ok(Value::String(format!(
                    "{}{}",
                    to_display_string(left),
                    to_display_string(right)
                )))
            } else {
                Ok(number(numeric(left)? + numeric(right)?))
            }
        }
        BinaryOp::Sub => Ok(number(numeric(left)? - numeric(right)?)),
        BinaryOp::Mul => Ok(number(numeric(left)? * numeric(right)?)),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = numeric(right)?;
            if divisor == 0.0 {
                return Err("division by zero".to_string());
            }
            let dividend = numeric(left)?;
            Ok(number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            }))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_equals(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_equals(left, right))),
        BinaryOp::StrictEq => Ok(Value::Bool(strict_equals(left, right))),
        BinaryOp::StrictNe => Ok(Value::Bool(!strict_equals(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => numeric(left)?.partial_cmp(&numeric(right)?),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_root_identifiers_only() {
        let (_, keys) = parse_expression("user.name + ' ' + count * 2 + undefined").unwrap();
        assert_eq!(keys, vec!["user".to_string(), "count".to_string()]);
    }

    #[test]
    fn test_lowering() {
        let (expr, _) = parse_expression("!(a && b)").unwrap();
        assert!(matches!(expr, Expr::Not(_)));
        let (expr, _) = parse_expression("[1, 'two', null]").unwrap();
        assert_eq!(
            expr,
            Expr::Array(vec![
                Expr::Literal(Value::from(1)),
                Expr::Literal(Value::String("two".into())),
                Expr::Literal(Value::Null),
            ])
        );
    }

    #[test]
    fn test_rejects_unsupported_syntax() {
        assert!(parse_expression("a = 1").is_err());
        assert!(parse_expression("f(1)").is_err());
        assert!(parse_expression("1 +").is_err());
    }

    #[test]
    fn test_binary_semantics() {
        assert_eq!(binary(BinaryOp::Add, &Value::from(1), &Value::from(2)).unwrap(), Value::from(3));
        assert_eq!(
            binary(BinaryOp::Add, &Value::from("a"), &Value::from(1)).unwrap(),
            Value::from("a1")
        );
        assert_eq!(binary(BinaryOp::Div, &Value::from(7), &Value::from(2)).unwrap(), Value::from(3.5));
        assert!(binary(BinaryOp::Rem, &Value::from(1), &Value::from(0)).is_err());
        assert_eq!(binary(BinaryOp::Lt, &Value::from("a"), &Value::from("b")).unwrap(), Value::Bool(true));
        assert_eq!(binary(BinaryOp::Eq, &Value::from("1"), &Value::from(1)).unwrap(), Value::Bool(true));
        assert_eq!(
            binary(BinaryOp::StrictEq, &Value::from("1"), &Value::from(1)).unwrap(),
            Value::Bool(false)
        );
    }
}

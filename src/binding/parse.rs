//! Attribute grammar.
//!
//! ```text
//! expr       = localized | list | expression | constant | variable
//! localized  = "[" key [":" comment] "]" default-literal
//! list       = "(" literal {"," literal} ")"
//! expression = "{" js-expression "}"
//! constant   = "true" | "false" | "null" | "=" field
//! variable   = field ["|" formatter] [":" default]
//! field      = "!" field | "^" name {"." key} | [Class "."] key {"." key}
//! formatter  = "$" field | "^" name | formatter-name
//! default    = "$" expr | "^" name {"." key} | literal
//! ```

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::expression::parse_expression;
use super::localized::LocalizedMemo;
use super::{Binding, ConstantOrigin};
use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{number, Value};

lazy_static::lazy_static! {
    static ref LEADING_KEY: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref INNER_KEY: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
    static ref NUMBER: Regex = Regex::new(r"^-?[0-9]+(\.[0-9]+)?$").unwrap();
}

/// What the parser needs to know about the application: which leading
/// names are registered class accessors rather than keys.
#[derive(Debug, Clone, Default)]
pub struct ParseEnv {
    classes: HashSet<String>,
}

impl ParseEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classes<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParseEnv {
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.classes.contains(name)
    }
}

pub(crate) fn parse_attribute(attribute: &str, env: &ParseEnv) -> RuntimeResult<Binding> {
    match attribute.strip_prefix('$') {
        None => Ok(Binding::Constant {
            value: Value::String(attribute.to_string()),
            origin: ConstantOrigin::Plain,
        }),
        Some(expr) => parse_expr(expr.trim(), env).map_err(|message| RuntimeError::Parse {
            text: attribute.to_string(),
            message,
        }),
    }
}

fn parse_expr(text: &str, env: &ParseEnv) -> Result<Binding, String> {
    if text.is_empty() {
        return Err("empty binding".to_string());
    }
    if let Some(rest) = text.strip_prefix('[') {
        return parse_localized(rest);
    }
    if text.starts_with('(') && text.ends_with(')') && text.len() >= 2 {
        return parse_list(&text[1..text.len() - 1]).map(Binding::List);
    }
    if text.starts_with('{') && text.ends_with('}') && text.len() >= 2 {
        let source = text[1..text.len() - 1].trim();
        let (expr, keys) = parse_expression(source)?;
        return Ok(Binding::Expression {
            source: source.to_string(),
            expr,
            keys,
        });
    }
    match text {
        "true" => return Ok(keyword(Value::Bool(true))),
        "false" => return Ok(keyword(Value::Bool(false))),
        "null" => return Ok(keyword(Value::Null)),
        _ => {}
    }
    if let Some(rest) = text.strip_prefix('=') {
        return Ok(Binding::DynamicConstant {
            inner: Box::new(parse_field(rest, env)?),
            resolved: OnceLock::new(),
        });
    }
    parse_variable(text, env)
}

fn keyword(value: Value) -> Binding {
    Binding::Constant {
        value,
        origin: ConstantOrigin::Keyword,
    }
}

fn literal(text: &str) -> Binding {
    Binding::Constant {
        value: Value::String(text.to_string()),
        origin: ConstantOrigin::Literal,
    }
}

fn parse_localized(rest: &str) -> Result<Binding, String> {
    let (head, default) = rest
        .split_once(']')
        .ok_or_else(|| "localized binding is missing ']'".to_string())?;
    let (key, comment) = match head.split_once(':') {
        Some((key, comment)) => (key, Some(comment.to_string())),
        None => (head, None),
    };
    if key.is_empty() {
        return Err("localized binding has an empty key".to_string());
    }
    Ok(Binding::Localized {
        key: key.to_string(),
        comment,
        default: default.to_string(),
        memo: LocalizedMemo::new(),
    })
}

fn parse_variable(text: &str, env: &ParseEnv) -> Result<Binding, String> {
    let (head, default) = match text.split_once(':') {
        Some((head, default)) => (head, Some(default)),
        None => (text, None),
    };
    let (field, formatter) = match head.split_once('|') {
        Some((field, formatter)) => (field, Some(formatter)),
        None => (head, None),
    };

    let mut binding = parse_field(field.trim(), env)?;
    if let Some(formatter) = formatter {
        binding = Binding::Formatted {
            primary: Box::new(binding),
            formatter: Box::new(parse_formatter(formatter.trim(), env)?),
        };
    }
    let default = match default {
        Some(default) => Some(parse_default(default, env)?),
        None => None,
    };

    Ok(match (binding, default) {
        (
            Binding::ParentDelegated {
                key,
                subpath,
                default: None,
            },
            Some(default),
        ) => Binding::ParentDelegated {
            key,
            subpath,
            default: Some(Box::new(default)),
        },
        (primary, Some(default)) => Binding::Defaulted {
            primary: Box::new(primary),
            default: Box::new(default),
        },
        (binding, None) => binding,
    })
}

fn parse_field(text: &str, env: &ParseEnv) -> Result<Binding, String> {
    if let Some(rest) = text.strip_prefix('!') {
        return Ok(Binding::Negated(Box::new(parse_field(rest, env)?)));
    }
    if let Some(rest) = text.strip_prefix('^') {
        let mut segments = split_keypath(rest)?;
        let key = segments.remove(0);
        return Ok(Binding::ParentDelegated {
            key,
            subpath: segments,
            default: None,
        });
    }
    let mut segments = split_keypath(text)?;
    if segments.len() > 1 && env.is_class(&segments[0]) {
        let class = segments.remove(0);
        return Ok(Binding::Static {
            class,
            path: segments,
        });
    }
    Ok(Binding::Keypath(segments))
}

fn split_keypath(text: &str) -> Result<Vec<String>, String> {
    let segments: Vec<String> = text.split('.').map(str::to_string).collect();
    for (i, segment) in segments.iter().enumerate() {
        let valid = if i == 0 {
            LEADING_KEY.is_match(segment)
        } else {
            INNER_KEY.is_match(segment)
        };
        if !valid {
            return Err(format!("invalid keypath '{}'", text));
        }
    }
    Ok(segments)
}

fn parse_formatter(text: &str, env: &ParseEnv) -> Result<Binding, String> {
    if let Some(rest) = text.strip_prefix('$') {
        return parse_field(rest, env);
    }
    if text.starts_with('^') {
        return parse_field(text, env);
    }
    if LEADING_KEY.is_match(text) {
        return Ok(literal(text));
    }
    Err(format!("invalid formatter '{}'", text))
}

fn parse_default(text: &str, env: &ParseEnv) -> Result<Binding, String> {
    if let Some(rest) = text.strip_prefix('$') {
        return parse_expr(rest.trim(), env);
    }
    if text.starts_with('^') {
        return parse_field(text, env);
    }
    Ok(literal(text))
}

// ═══════════════════════════════════════════════════════════════════════════════
// LISTS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_list(inner: &str) -> Result<Vec<Value>, String> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;

    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            // A doubled delimiter inside a quoted item stands for itself.
            Some(q) if c == q && chars.peek() == Some(&q) => {
                current.push(q);
                chars.next();
            }
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                ',' => {
                    items.push(list_item(&current, quoted));
                    current.clear();
                    quoted = false;
                }
                '"' | '\'' if !quoted && current.trim().is_empty() => {
                    current.clear();
                    quote = Some(c);
                    quoted = true;
                }
                c if quoted => {
                    if !c.is_whitespace() {
                        return Err(format!("unexpected '{}' after quoted list item", c));
                    }
                }
                _ => current.push(c),
            },
        }
    }
    if quote.is_some() {
        return Err("unterminated quote in list".to_string());
    }
    items.push(list_item(&current, quoted));
    Ok(items)
}

/// Quoted text is kept verbatim; bare text is trimmed and typed.
fn list_item(text: &str, quoted: bool) -> Value {
    if quoted {
        return Value::String(text.to_string());
    }
    match text.trim() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        t if NUMBER.is_match(t) => t.parse::<f64>().map(number).unwrap_or(Value::Null),
        t => Value::String(t.to_string()),
    }
}

/// Writes a list item so that it parses back to the same value. Strings
/// that need quoting use whichever delimiter they lack, or doubled `"`
/// when they hold both.
pub(crate) fn list_item_source(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let plain = !s.is_empty()
                && s.trim() == s
                && !matches!(s.as_str(), "true" | "false" | "null")
                && !NUMBER.is_match(s)
                && !s.contains([',', '"', '\'']);
            if plain {
                s.clone()
            } else if !s.contains('"') {
                format!("\"{}\"", s)
            } else if !s.contains('\'') {
                format!("'{}'", s)
            } else {
                format!("\"{}\"", s.replace('"', "\"\""))
            }
        }
        other => other.to_string(),
    }
}

//! Binding Module for Zenith Runtime
//!
//! A binding is parsed once from an attribute string and evaluated on demand
//! against a `Scope`: the context object (the component whose template
//! declares the occurrence) and, above it, the chain of occurrences that led
//! there. Bindings never own live values, with the single exception of the
//! resolve-once `DynamicConstant`.

mod expression;
mod format;
mod localized;
mod parse;
mod scope;

use std::sync::{Arc, OnceLock};

use crate::definition::ComponentDefinition;
use crate::error::{BindingError, RuntimeResult};
use crate::request::FieldError;
use crate::validate::{
    Direction, ValidationContext, ValidationRecord, VAL_EXPRESSION_KEY, VAL_MISSING_ACCESSOR,
    VAL_MISSING_GETTER, VAL_MISSING_SETTER, VAL_UNKNOWN_CLASS,
};
use crate::value::{get_key, is_truthy, to_display_string, Value};

pub use expression::Expr;
pub use format::{builtin_formatters, Formatter};
pub use localized::LocalizedMemo;
pub use parse::ParseEnv;
pub use scope::{Frame, Scope};

pub(crate) use scope::{set_nested, Lease};

/// Where a constant came from; decides how it is written back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantOrigin {
    /// An attribute written without the `$` sigil.
    Plain,
    /// `true`, `false` or `null`.
    Keyword,
    /// The literal after `:` in a default or after `]` in a localized string.
    Literal,
}

#[derive(Debug)]
pub enum Binding {
    Keypath(Vec<String>),
    ParentDelegated {
        key: String,
        subpath: Vec<String>,
        default: Option<Box<Binding>>,
    },
    /// `Class.keypath` against a registered static accessor.
    Static { class: String, path: Vec<String> },
    Negated(Box<Binding>),
    Formatted {
        primary: Box<Binding>,
        formatter: Box<Binding>,
    },
    Defaulted {
        primary: Box<Binding>,
        default: Box<Binding>,
    },
    Constant { value: Value, origin: ConstantOrigin },
    List(Vec<Value>),
    /// `=keypath`: evaluated the first time, constant afterwards.
    DynamicConstant {
        inner: Box<Binding>,
        resolved: OnceLock<Value>,
    },
    Localized {
        key: String,
        comment: Option<String>,
        default: String,
        memo: LocalizedMemo,
    },
    Expression {
        source: String,
        expr: Expr,
        keys: Vec<String>,
    },
}

impl Binding {
    pub fn parse(attribute: &str, env: &ParseEnv) -> RuntimeResult<Binding> {
        parse::parse_attribute(attribute, env)
    }

    pub fn constant(value: Value) -> Binding {
        Binding::Constant {
            value,
            origin: ConstantOrigin::Literal,
        }
    }

    pub fn keypath(path: &str) -> Binding {
        Binding::Keypath(path.split('.').map(str::to_string).collect())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn value(&self, scope: &mut Scope<'_>) -> RuntimeResult<Value> {
        match self {
            Binding::Keypath(path) => Ok(scope.value_for_keypath(path)?),
            Binding::ParentDelegated {
                key,
                subpath,
                default,
            } => match scope.parent_binding(key) {
                Some((reference, context)) => {
                    let Some(parent) = reference.binding(key).cloned() else {
                        return Ok(Value::Null);
                    };
                    let mut value = parent.value(&mut scope.rescope(context))?;
                    for segment in subpath {
                        value = get_key(&value, segment).unwrap_or(Value::Null);
                    }
                    Ok(value)
                }
                None => match default {
                    Some(default) => default.value(scope),
                    None => Ok(Value::Null),
                },
            },
            Binding::Static { class, path } => {
                let root = scope
                    .env()
                    .app()
                    .static_value(class)
                    .ok_or_else(|| BindingError::UnknownClass(class.clone()))?;
                Ok(path
                    .iter()
                    .try_fold(root, |value, segment| get_key(&value, segment))
                    .unwrap_or(Value::Null))
            }
            Binding::Negated(inner) => Ok(Value::Bool(!is_truthy(&inner.value(scope)?))),
            Binding::Formatted { primary, formatter } => {
                let value = primary.value(scope)?;
                if value.is_null() {
                    return Ok(value);
                }
                match resolve_formatter(formatter, scope)? {
                    Some(formatter) => Ok(Value::String(
                        formatter
                            .format(&value)
                            .unwrap_or_else(|_| to_display_string(&value)),
                    )),
                    None => Ok(value),
                }
            }
            Binding::Defaulted { primary, default } => match primary.value(scope)? {
                Value::Null => default.value(scope),
                value => Ok(value),
            },
            Binding::Constant { value, .. } => Ok(value.clone()),
            Binding::List(items) => Ok(Value::Array(items.clone())),
            Binding::DynamicConstant { inner, resolved } => {
                if let Some(value) = resolved.get() {
                    return Ok(value.clone());
                }
                let value = inner.value(scope)?;
                Ok(resolved.get_or_init(|| value).clone())
            }
            Binding::Localized {
                key,
                default,
                memo,
                ..
            } => Ok(Value::String(memo.resolve(key, default, scope))),
            Binding::Expression { source, expr, .. } => {
                expr.eval(scope).map_err(|message| {
                    BindingError::Expression {
                        expression: source.clone(),
                        message,
                    }
                    .into()
                })
            }
        }
    }

    pub fn set_value(&self, value: Value, scope: &mut Scope<'_>) -> RuntimeResult<()> {
        match self {
            Binding::Keypath(path) => Ok(scope.take_value_for_keypath(path, value)?),
            Binding::ParentDelegated {
                key,
                subpath,
                default,
            } => match scope.parent_binding(key) {
                Some((reference, context)) => {
                    let Some(parent) = reference.binding(key).cloned() else {
                        return Ok(());
                    };
                    let mut parent_scope = scope.rescope(context);
                    if subpath.is_empty() {
                        return parent.set_value(value, &mut parent_scope);
                    }
                    let mut root = parent.value(&mut parent_scope)?;
                    set_nested(&mut root, subpath, value).map_err(|message| {
                        BindingError::SetFailed {
                            object: format!("^{}", key),
                            keypath: subpath.join("."),
                            message,
                        }
                    })?;
                    parent.set_value(root, &mut parent_scope)
                }
                None => match default {
                    Some(default) => default.set_value(value, scope),
                    None => Ok(()),
                },
            },
            Binding::Static { class, path } => {
                scope.env().app().set_static_path(class, path, value)
            }
            Binding::Negated(inner) => inner.set_value(Value::Bool(!is_truthy(&value)), scope),
            Binding::Formatted { primary, formatter } => {
                let text = match &value {
                    Value::String(text) => text.clone(),
                    _ => return primary.set_value(value, scope),
                };
                match resolve_formatter(formatter, scope)? {
                    Some(formatter) => match formatter.parse(&text) {
                        Ok(parsed) => primary.set_value(parsed, scope),
                        Err(message) => {
                            scope.env().record_error(FieldError {
                                element_id: None,
                                key: primary.source(),
                                message,
                                value: Some(text),
                            });
                            Ok(())
                        }
                    },
                    None => primary.set_value(value, scope),
                }
            }
            Binding::Defaulted { primary, .. } => primary.set_value(value, scope),
            Binding::Constant { .. }
            | Binding::List(_)
            | Binding::DynamicConstant { .. }
            | Binding::Localized { .. }
            | Binding::Expression { .. } => {
                Err(BindingError::NotSettable(self.description()).into())
            }
        }
    }

    /// Whether a write can succeed, decided without evaluating anything.
    pub fn is_settable(&self, scope: &Scope<'_>) -> bool {
        match self {
            Binding::Keypath(_) | Binding::Static { .. } => true,
            Binding::ParentDelegated { key, default, .. } => {
                scope.parent_binding(key).is_some() || default.is_some()
            }
            Binding::Negated(inner) => inner.is_settable(scope),
            Binding::Formatted { primary, .. } | Binding::Defaulted { primary, .. } => {
                primary.is_settable(scope)
            }
            _ => false,
        }
    }

    /// Constant classification. A dynamic constant becomes constant once
    /// resolved and never goes back.
    pub fn is_constant(&self) -> bool {
        match self {
            Binding::Constant { .. } | Binding::List(_) => true,
            Binding::DynamicConstant { resolved, .. } => resolved.get().is_some(),
            Binding::Negated(inner) => inner.is_constant(),
            _ => false,
        }
    }

    /// For parent-delegated bindings: whether the parent occurrence binds the
    /// key. Everything else exists by construction.
    pub fn binding_exists(&self, scope: &Scope<'_>) -> bool {
        match self {
            Binding::ParentDelegated { key, .. } => scope.parent_binding(key).is_some(),
            _ => true,
        }
    }

    /// Human-readable resolution trail, walking delegated bindings upward.
    pub fn debug_value(&self, scope: &mut Scope<'_>) -> String {
        match self {
            Binding::ParentDelegated { key, default, .. } => match scope.parent_binding(key) {
                Some((reference, context)) => match reference.binding(key).cloned() {
                    Some(parent) => format!(
                        "{} -> <{}> {}",
                        self.description(),
                        reference.definition().name(),
                        parent.debug_value(&mut scope.rescope(context))
                    ),
                    None => format!("{} -> (unbound)", self.description()),
                },
                None => match default {
                    Some(default) => {
                        format!("{} -> default {}", self.description(), default.debug_value(scope))
                    }
                    None => format!("{} -> (unbound)", self.description()),
                },
            },
            _ => match self.value(scope) {
                Ok(value) => format!("{} = {}", self.description(), value),
                Err(e) => format!("{} ! {}", self.description(), e),
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DESCRIPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// The attribute text this binding was parsed from, in canonical form.
    pub fn description(&self) -> String {
        match self {
            Binding::Constant {
                value,
                origin: ConstantOrigin::Plain,
            } => to_display_string(value),
            _ => format!("${}", self.source()),
        }
    }

    /// Canonical text without the leading sigil.
    pub fn source(&self) -> String {
        match self {
            Binding::Keypath(path) => path.join("."),
            Binding::ParentDelegated {
                key,
                subpath,
                default,
            } => {
                let mut text = format!("^{}", key);
                for segment in subpath {
                    text.push('.');
                    text.push_str(segment);
                }
                if let Some(default) = default {
                    text.push(':');
                    text.push_str(&default.default_source());
                }
                text
            }
            Binding::Static { class, path } => {
                let mut text = class.clone();
                for segment in path {
                    text.push('.');
                    text.push_str(segment);
                }
                text
            }
            Binding::Negated(inner) => format!("!{}", inner.source()),
            Binding::Formatted { primary, formatter } => {
                format!("{}|{}", primary.source(), formatter.default_source())
            }
            Binding::Defaulted { primary, default } => {
                format!("{}:{}", primary.source(), default.default_source())
            }
            Binding::Constant { value, origin } => match origin {
                ConstantOrigin::Keyword => value.to_string(),
                _ => to_display_string(value),
            },
            Binding::List(items) => {
                let items: Vec<String> = items.iter().map(parse::list_item_source).collect();
                format!("({})", items.join(", "))
            }
            Binding::DynamicConstant { inner, .. } => format!("={}", inner.source()),
            Binding::Localized {
                key,
                comment,
                default,
                ..
            } => match comment {
                Some(comment) => format!("[{}:{}]{}", key, comment, default),
                None => format!("[{}]{}", key, default),
            },
            Binding::Expression { source, .. } => format!("{{{}}}", source),
        }
    }

    /// Text used in a default or formatter position, where literals and
    /// `^` lookups stand alone and everything else carries `$`.
    fn default_source(&self) -> String {
        match self {
            Binding::Constant {
                origin: ConstantOrigin::Literal,
                value,
            } => to_display_string(value),
            Binding::ParentDelegated { .. } => self.source(),
            _ => format!("${}", self.source()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VALIDATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Checks the accessors this binding needs on `owner`, the definition
    /// whose template declares it.
    pub fn validate(
        &self,
        direction: Direction,
        owner: &ComponentDefinition,
        binding_name: &str,
        static_exists: &dyn Fn(&str) -> bool,
        validation: &ValidationContext,
    ) -> RuntimeResult<()> {
        let report = |code: &str, message: String| {
            validation.report(ValidationRecord::new(
                code,
                &message,
                owner.name(),
                Some(binding_name),
            ))
        };
        match self {
            Binding::Keypath(path) => {
                let Some(first) = path.first() else {
                    return Ok(());
                };
                match owner.fields().accessor(first) {
                    Some(accessor) => {
                        if direction.needs_get() && !accessor.has_getter() {
                            report(
                                VAL_MISSING_GETTER,
                                format!("'{}' on <{}> cannot be read", first, owner.name()),
                            )?;
                        }
                        if direction.needs_set() && !accessor.has_setter() {
                            report(
                                VAL_MISSING_SETTER,
                                format!("'{}' on <{}> has no setter", first, owner.name()),
                            )?;
                        }
                        Ok(())
                    }
                    None if owner.dynamic_keys() => Ok(()),
                    None => report(
                        VAL_MISSING_ACCESSOR,
                        format!("<{}> has no key '{}'", owner.name(), first),
                    ),
                }
            }
            Binding::ParentDelegated { default, .. } => match default {
                Some(default) => {
                    default.validate(direction, owner, binding_name, static_exists, validation)
                }
                None => Ok(()),
            },
            Binding::Static { class, .. } => {
                if static_exists(class) {
                    Ok(())
                } else {
                    report(VAL_UNKNOWN_CLASS, format!("no class accessor '{}'", class))
                }
            }
            Binding::Negated(inner) => {
                inner.validate(direction, owner, binding_name, static_exists, validation)
            }
            Binding::Formatted { primary, formatter } => {
                primary.validate(direction, owner, binding_name, static_exists, validation)?;
                formatter.validate(Direction::Get, owner, binding_name, static_exists, validation)
            }
            Binding::Defaulted { primary, default } => {
                primary.validate(direction, owner, binding_name, static_exists, validation)?;
                default.validate(Direction::Get, owner, binding_name, static_exists, validation)
            }
            Binding::Expression { keys, source, .. } => {
                for key in keys {
                    match owner.fields().accessor(key) {
                        Some(accessor) if !accessor.has_getter() => report(
                            VAL_MISSING_GETTER,
                            format!("'{}' in {{{}}} cannot be read", key, source),
                        )?,
                        Some(_) => {}
                        None if owner.dynamic_keys() => {}
                        None => report(
                            VAL_EXPRESSION_KEY,
                            format!("'{}' in {{{}}} is not a key of <{}>", key, source, owner.name()),
                        )?,
                    }
                }
                if direction.needs_set() {
                    report(
                        VAL_MISSING_SETTER,
                        format!("expression {{{}}} cannot be written", source),
                    )?;
                }
                Ok(())
            }
            Binding::DynamicConstant { inner, .. } => {
                inner.validate(Direction::Get, owner, binding_name, static_exists, validation)?;
                if direction.needs_set() {
                    report(
                        VAL_MISSING_SETTER,
                        format!("constant {} cannot be written", self.description()),
                    )?;
                }
                Ok(())
            }
            Binding::Constant { .. } | Binding::List(_) | Binding::Localized { .. } => {
                if direction.needs_set() {
                    report(
                        VAL_MISSING_SETTER,
                        format!("constant {} cannot be written", self.description()),
                    )?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

/// A formatter binding evaluates to a formatter name; `null` means none.
fn resolve_formatter(
    formatter: &Binding,
    scope: &mut Scope<'_>,
) -> RuntimeResult<Option<Arc<dyn Formatter>>> {
    match formatter.value(scope)? {
        Value::Null => Ok(None),
        Value::String(name) if name.is_empty() => Ok(None),
        value => {
            let name = to_display_string(&value);
            scope
                .env()
                .app()
                .formatter(&name)
                .map(Some)
                .ok_or_else(|| BindingError::UnknownFormatter(name).into())
        }
    }
}

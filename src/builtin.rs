//! Built-in Components for Zenith Runtime
//!
//! The dynamic elements every application gets: text output, form inputs,
//! action links, conditionals and repetition. They keep no state between
//! hooks apart from what their bindings resolve to.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::Application;
use crate::binding::Binding;
use crate::component::{Component, Iterations, PhaseContext};
use crate::definition::ComponentClass;
use crate::error::RuntimeResult;
use crate::fields::FieldTable;
use crate::validate::Direction;
use crate::value::{to_display_string, Value};

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Registers the built-ins. Applications replace one with `reload_class`.
pub(crate) fn register_builtins(app: &Application) {
    let classes = vec![
        ComponentClass::new::<StringElement>("String")
            .required(&["value"])
            .supported(&["escape"]),
        ComponentClass::new::<TextField>("TextField")
            .pooled_locally()
            .fields(
                FieldTable::builder::<TextField>()
                    .binding_slot("value", |field, binding| field.value = binding)
                    .build(),
            )
            .required(&["value"])
            .direction("value", Direction::Both),
        ComponentClass::new::<Checkbox>("Checkbox")
            .pooled_locally()
            .required(&["checked"])
            .direction("checked", Direction::Both),
        ComponentClass::new::<Hyperlink>("Hyperlink")
            .required(&["action"])
            .supported(&["class"]),
        ComponentClass::new::<Download>("Download")
            .required(&["value"])
            .supported(&["filename"]),
        ComponentClass::new::<Conditional>("If")
            .required(&["condition"])
            .supported(&["negate"])
            .requires_content(),
        ComponentClass::new::<Repetition>("For")
            .required(&["list"])
            .supported(&["item", "index"])
            .direction("item", Direction::Set)
            .direction("index", Direction::Set)
            .requires_content(),
    ];
    for class in classes {
        let name = class.name().to_string();
        if let Err(e) = app.register(class) {
            warn!(component = %name, error = %e, "skipped built-in component");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

/// `<String value=... escape=...>`; escapes unless `escape` is false.
#[derive(Default)]
pub struct StringElement;

impl Component for StringElement {
    fn render(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        let text = ctx.string_for_binding("value")?;
        let escape = !ctx.has_binding("escape") || ctx.bool_for_binding("escape")?;
        if escape {
            ctx.write(&escape_html(&text));
        } else {
            ctx.write(&text);
        }
        Ok(())
    }
}

/// Streams a value in a full response only. An incremental exchange that
/// reaches a download is retried as a full request.
#[derive(Default)]
pub struct Download;

impl Component for Download {
    fn render(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        if ctx.is_incremental() {
            debug!(element_id = %ctx.element_id(), "download needs a full response");
            ctx.request_retry();
            return Ok(());
        }
        let id = ctx.emit_element_id();
        let filename = ctx.string_for_binding("filename")?;
        let value = ctx.string_for_binding("value")?;
        ctx.write(&format!(
            "<pre id=\"{}\" data-filename=\"{}\">{}</pre>",
            id,
            escape_html(&filename),
            escape_html(&value)
        ));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORM INPUTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A text input named by its element id. Each occurrence pools its own
/// instances, so the `value` binding is pinned once at construction.
#[derive(Default)]
pub struct TextField {
    value: Option<Arc<Binding>>,
}

impl TextField {
    pub fn value_binding(&self) -> Option<&Arc<Binding>> {
        self.value.as_ref()
    }

    fn binding(&self, ctx: &PhaseContext<'_>) -> RuntimeResult<Arc<Binding>> {
        self.value
            .clone()
            .or_else(|| ctx.binding("value"))
            .ok_or_else(|| ctx.component_error("no value binding"))
    }
}

impl Component for TextField {
    fn apply_values(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        if let Some(submitted) = ctx.form_value() {
            let binding = self.binding(ctx)?;
            ctx.set_binding_value(&binding, Value::String(submitted))?;
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        let id = ctx.emit_element_id();
        let binding = self.binding(ctx)?;
        let value = to_display_string(&ctx.binding_value(&binding)?);
        ctx.write(&format!(
            "<input type=\"text\" name=\"{}\" value=\"{}\">",
            id,
            escape_html(&value)
        ));
        Ok(())
    }
}

/// A checkbox. Inside a posted form an absent value unchecks it; exchanges
/// without a form never touch it.
#[derive(Default)]
pub struct Checkbox;

impl Component for Checkbox {
    fn apply_values(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        if !ctx.is_form_submitted() {
            return Ok(());
        }
        let checked = matches!(ctx.form_value().as_deref(), Some("on" | "true" | "1"));
        ctx.set_value_for_binding("checked", Value::Bool(checked))
    }

    fn render(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        let id = ctx.emit_element_id();
        let checked = if ctx.bool_for_binding("checked")? { " checked" } else { "" };
        ctx.write(&format!("<input type=\"checkbox\" name=\"{}\"{}>", id, checked));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// `<a>` whose element id is the sender id of its action.
#[derive(Default)]
pub struct Hyperlink;

impl Component for Hyperlink {
    fn invoke_action(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<Option<Value>> {
        ctx.value_for_binding("action").map(Some)
    }

    fn render(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        let id = ctx.emit_element_id();
        match ctx.binding("class") {
            Some(binding) => {
                let class = to_display_string(&ctx.binding_value(&binding)?);
                ctx.write(&format!(
                    "<a data-sender=\"{}\" class=\"{}\">",
                    id,
                    escape_html(&class)
                ));
            }
            None => ctx.write(&format!("<a data-sender=\"{}\">", id)),
        }
        Ok(())
    }

    fn render_end(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        ctx.write("</a>");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL FLOW
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct Conditional;

impl Component for Conditional {
    fn iterations(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<Iterations> {
        let mut show = ctx.bool_for_binding("condition")?;
        if ctx.has_binding("negate") && ctx.bool_for_binding("negate")? {
            show = !show;
        }
        Ok(if show { Iterations::Once } else { Iterations::Skip })
    }
}

/// Walks its content once per list element, writing the element and its
/// index through the `item` and `index` bindings first.
#[derive(Default)]
pub struct Repetition;

impl Repetition {
    fn list(ctx: &mut PhaseContext<'_>) -> RuntimeResult<Vec<Value>> {
        Ok(match ctx.value_for_binding("list")? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }
}

impl Component for Repetition {
    fn iterations(&mut self, ctx: &mut PhaseContext<'_>) -> RuntimeResult<Iterations> {
        Ok(Iterations::Repeat(Self::list(ctx)?.len()))
    }

    fn prepare_iteration(&mut self, index: usize, ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        let item = Self::list(ctx)?.into_iter().nth(index).unwrap_or(Value::Null);
        ctx.set_value_for_binding("item", item)?;
        ctx.set_value_for_binding("index", Value::from(index as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & \"c\""), "a &lt; b &amp; &quot;c&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_builtins_registered() {
        let app = Application::default();
        for name in ["String", "TextField", "Checkbox", "Hyperlink", "Download", "If", "For"] {
            assert!(app.has_class(name), "missing built-in {}", name);
        }
        assert!(app.definition("TextField").unwrap().new_local_pool().is_some());
        assert!(app.definition("String").unwrap().shared_slot().is_some());
    }
}

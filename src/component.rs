//! Component Module for Zenith Runtime
//!
//! The `Component` trait is the live binding context of one tree node. The
//! engine drives every hook; a hook never walks children itself, so the
//! parent chain is free while the hook runs and bindings can write into it.

use std::any::Any;
use std::sync::Arc;

use crate::binding::{Binding, Scope};
use crate::element_id::ElementIdPath;
use crate::error::{RuntimeError, RuntimeResult};
use crate::reference::ComponentReference;
use crate::request::FieldError;
use crate::value::{is_truthy, to_display_string, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ApplyValues,
    InvokeAction,
    Render,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::ApplyValues => "apply-values",
            Phase::InvokeAction => "invoke-action",
            Phase::Render => "render",
        })
    }
}

/// How many times a component's content is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Skip,
    Once,
    /// Each iteration gets its own element id level.
    Repeat(usize),
}

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub trait Component: AsAny + Send {
    fn awake(&mut self) {}

    fn sleep(&mut self) {}

    fn apply_values(&mut self, _ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        Ok(())
    }

    /// Called on the node whose element id matches the sender id. `Some`
    /// carries the action result; `None` means the node had nothing to do.
    fn invoke_action(&mut self, _ctx: &mut PhaseContext<'_>) -> RuntimeResult<Option<Value>> {
        Ok(None)
    }

    fn render(&mut self, _ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        Ok(())
    }

    /// Runs after the content has been rendered.
    fn render_end(&mut self, _ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        Ok(())
    }

    fn iterations(&mut self, _ctx: &mut PhaseContext<'_>) -> RuntimeResult<Iterations> {
        Ok(Iterations::Once)
    }

    fn prepare_iteration(&mut self, _index: usize, _ctx: &mut PhaseContext<'_>) -> RuntimeResult<()> {
        Ok(())
    }

    /// Fallback for keys missing from the field table.
    fn value_for_key(&mut self, _key: &str) -> Option<Value> {
        None
    }

    fn take_value_for_key(&mut self, _key: &str, _value: Value) -> bool {
        false
    }
}

pub(crate) fn any_mut<'a>(instance: &'a mut (dyn Component + 'static)) -> &'a mut dyn Any {
    instance.as_any_mut()
}

/// Exchange output accumulated by one phase walk.
#[derive(Debug, Default)]
pub(crate) struct PhaseOutput {
    pub(crate) content: String,
    pub(crate) retry: bool,
    pub(crate) action_result: Option<Value>,
    pub(crate) emitted: Vec<ElementIdPath>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PHASE CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// What a hook sees of the walk: its occurrence, its element id, the parent
/// chain for binding evaluation, and the exchange output.
pub struct PhaseContext<'a> {
    pub(crate) scope: Scope<'a>,
    pub(crate) reference: Option<&'a ComponentReference>,
    pub(crate) element_id: ElementIdPath,
    pub(crate) phase: Phase,
    pub(crate) output: &'a mut PhaseOutput,
}

impl<'a> PhaseContext<'a> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn element_id(&self) -> &ElementIdPath {
        &self.element_id
    }

    pub fn component_name(&self) -> &str {
        self.reference
            .map(|r| r.definition().name())
            .unwrap_or("<root>")
    }

    /// The value the client submitted for this node, correlated by element id.
    pub fn form_value(&self) -> Option<String> {
        self.scope
            .env()
            .request()
            .form_values
            .get(&self.element_id.to_string())
            .cloned()
    }

    /// True when the exchange carries a posted form, as opposed to a bare
    /// action click.
    pub fn is_form_submitted(&self) -> bool {
        self.scope.env().request().is_form_submission()
    }

    pub fn is_incremental(&self) -> bool {
        self.scope.env().request().incremental
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.binding(name).is_some()
    }

    pub fn binding(&self, name: &str) -> Option<Arc<Binding>> {
        self.reference.and_then(|r| r.binding(name).cloned())
    }

    /// Evaluates this occurrence's binding; absent bindings read as `null`.
    pub fn value_for_binding(&mut self, name: &str) -> RuntimeResult<Value> {
        match self.binding(name) {
            Some(binding) => self.binding_value(&binding),
            None => Ok(Value::Null),
        }
    }

    pub fn string_for_binding(&mut self, name: &str) -> RuntimeResult<String> {
        Ok(to_display_string(&self.value_for_binding(name)?))
    }

    pub fn bool_for_binding(&mut self, name: &str) -> RuntimeResult<bool> {
        Ok(is_truthy(&self.value_for_binding(name)?))
    }

    /// Writes through this occurrence's binding; absent bindings ignore the write.
    pub fn set_value_for_binding(&mut self, name: &str, value: Value) -> RuntimeResult<()> {
        match self.binding(name) {
            Some(binding) => self.set_binding_value(&binding, value),
            None => Ok(()),
        }
    }

    pub fn binding_value(&mut self, binding: &Binding) -> RuntimeResult<Value> {
        binding.value(&mut self.scope)
    }

    pub fn set_binding_value(&mut self, binding: &Binding, value: Value) -> RuntimeResult<()> {
        binding.set_value(value, &mut self.scope)
    }

    pub fn is_binding_settable(&self, name: &str) -> bool {
        match self.binding(name) {
            Some(binding) => binding.is_settable(&self.scope),
            None => false,
        }
    }

    /// Appends response content; ignored outside the render phase.
    pub fn write(&mut self, text: &str) {
        if self.phase == Phase::Render {
            self.output.content.push_str(text);
        }
    }

    /// Marks this node's element id as emitted into the response.
    pub fn emit_element_id(&mut self) -> String {
        let id = self.element_id.to_string();
        if self.phase == Phase::Render {
            self.output.emitted.push(self.element_id.clone());
        }
        id
    }

    /// Short-circuits the rest of this exchange; the client retries it as a
    /// full request.
    pub fn request_retry(&mut self) {
        self.output.retry = true;
    }

    pub fn record_error(&mut self, key: &str, message: &str, value: Option<String>) {
        self.scope.env().record_error(FieldError {
            element_id: Some(self.element_id.clone()),
            key: key.to_string(),
            message: message.to_string(),
            value,
        });
    }

    pub fn locale(&self) -> String {
        self.scope.env().locale().to_string()
    }

    pub fn component_error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::component(self.component_name(), message)
    }
}

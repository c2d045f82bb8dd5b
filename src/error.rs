//! Error Module for Zenith Runtime
//!
//! One error type for the exchange, one for binding evaluation, and the
//! tagged phase outcome the orchestrator checks instead of unwinding.

use thiserror::Error;

use crate::element_id::ElementIdPath;
use crate::validate::ValidationRecord;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    #[error("unknown key '{keypath}' on {object}")]
    UnknownKey { object: String, keypath: String },

    #[error("value for '{keypath}' rejected by {object}: {message}")]
    SetFailed {
        object: String,
        keypath: String,
        message: String,
    },

    #[error("binding '{0}' is not settable")]
    NotSettable(String),

    #[error("no context object available to evaluate '{0}'")]
    NoContext(String),

    #[error("unknown class accessor '{0}'")]
    UnknownClass(String),

    #[error("unknown formatter '{0}'")]
    UnknownFormatter(String),

    #[error("expression '{expression}' failed: {message}")]
    Expression { expression: String, message: String },
}

#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("cannot parse binding '{text}': {message}")]
    Parse { text: String, message: String },

    #[error("no stateful <{component}> found at element id {path}")]
    Rendezvous { path: ElementIdPath, component: String },

    #[error("validation failed: {0}")]
    Validation(ValidationRecord),

    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("unbalanced element id nesting: {0}")]
    UnbalancedNesting(String),

    #[error("invalid element id '{0}'")]
    InvalidElementId(String),

    #[error("page {0} is no longer available in this session")]
    PageExpired(u64),

    #[error("page root <{0}> was built from a stale definition")]
    StalePageRoot(String),

    #[error("component <{component}> failed: {message}")]
    Component { component: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("{source}\n  at {}", trace.join("\n  at "))]
    InComponent {
        trace: Vec<String>,
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Appends one tree location to the causal chain. Already wrapped errors
    /// grow their trace instead of nesting another layer.
    pub fn wrap_at(self, location: String) -> RuntimeError {
        match self {
            RuntimeError::InComponent { mut trace, source } => {
                trace.push(location);
                RuntimeError::InComponent { trace, source }
            }
            other => RuntimeError::InComponent {
                trace: vec![location],
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with every path wrapper removed.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::InComponent { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Tree locations accumulated while propagating, innermost first.
    pub fn trace(&self) -> &[String] {
        match self {
            RuntimeError::InComponent { trace, .. } => trace,
            _ => &[],
        }
    }

    pub fn is_rendezvous(&self) -> bool {
        matches!(self.root_cause(), RuntimeError::Rendezvous { .. })
    }

    pub fn component(component: &str, message: impl Into<String>) -> Self {
        RuntimeError::Component {
            component: component.to_string(),
            message: message.into(),
        }
    }
}

/// Result of one phase walk.
#[derive(Debug)]
pub enum PhaseOutcome {
    Continue,
    /// The client must re-issue the exchange as a full request.
    Retry,
    Fatal(RuntimeError),
}

impl PhaseOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, PhaseOutcome::Continue)
    }
}

impl From<RuntimeResult<()>> for PhaseOutcome {
    fn from(result: RuntimeResult<()>) -> Self {
        match result {
            Ok(()) => PhaseOutcome::Continue,
            Err(e) => PhaseOutcome::Fatal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_accumulates_trace() {
        let err = RuntimeError::from(BindingError::UnknownKey {
            object: "Counter".to_string(),
            keypath: "missing".to_string(),
        });
        let wrapped = err
            .wrap_at("TextField at 1.2".to_string())
            .wrap_at("Form at 1".to_string());

        assert_eq!(wrapped.trace(), &["TextField at 1.2", "Form at 1"]);
        assert!(matches!(
            wrapped.root_cause(),
            RuntimeError::Binding(BindingError::UnknownKey { .. })
        ));
        let text = wrapped.to_string();
        assert!(text.contains("unknown key 'missing' on Counter"));
        assert!(text.contains("at Form at 1"));
    }

    #[test]
    fn test_phase_outcome_from_result() {
        assert!(PhaseOutcome::from(Ok(())).is_continue());
        let fatal = PhaseOutcome::from(Err(RuntimeError::UnknownComponent("X".into())));
        assert!(matches!(fatal, PhaseOutcome::Fatal(_)));
    }
}

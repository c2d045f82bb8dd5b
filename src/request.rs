//! Request Module for Zenith Runtime
//!
//! One exchange: the client's request, the environment bindings see while
//! the tree is walked, and the `RequestContext` that runs the three phases
//! (apply values, invoke action, render) against a page.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::Application;
use crate::component::{Phase, PhaseOutput};
use crate::element_id::{ElementIdCursor, ElementIdGenerator, ElementIdPath, TracingCursor};
use crate::error::{PhaseOutcome, RuntimeError, RuntimeResult};
use crate::localization::ResourceManager;
use crate::page::Page;
use crate::session::SessionState;
use crate::value::Value;
use crate::walk::TreeWalker;

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub session_id: String,
    /// Page the submission belongs to. `None` opens a new page.
    #[serde(default)]
    pub page_id: Option<u64>,
    /// Component to root a new page at; defaults to the configured main page.
    #[serde(default)]
    pub page_name: Option<String>,
    /// Queued action senders, processed in order.
    #[serde(default)]
    pub sender_ids: Vec<ElementIdPath>,
    /// Submitted values keyed by element id.
    #[serde(default)]
    pub form_values: HashMap<String, String>,
    /// The client posted its form. Set even when no control sent a value,
    /// since an unchecked checkbox sends nothing.
    #[serde(default)]
    pub form_submitted: bool,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub locale: Option<String>,
    /// Skip subtrees whose stateful instance cannot be found instead of
    /// failing the exchange.
    #[serde(default)]
    pub allow_failed_rendezvous: bool,
}

impl Request {
    pub fn new(session_id: &str) -> Self {
        Request {
            session_id: session_id.to_string(),
            ..Default::default()
        }
    }

    pub fn page(mut self, page_id: u64) -> Self {
        self.page_id = Some(page_id);
        self
    }

    pub fn open(mut self, page_name: &str) -> Self {
        self.page_name = Some(page_name.to_string());
        self
    }

    pub fn sender(mut self, id: ElementIdPath) -> Self {
        self.sender_ids.push(id);
        self
    }

    pub fn value(mut self, id: &ElementIdPath, value: &str) -> Self {
        self.form_values.insert(id.to_string(), value.to_string());
        self.form_submitted = true;
        self
    }

    pub fn submit_form(mut self) -> Self {
        self.form_submitted = true;
        self
    }

    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    pub fn allow_failed_rendezvous(mut self) -> Self {
        self.allow_failed_rendezvous = true;
        self
    }

    /// Whether the apply-values phase has anything to apply. A link click
    /// carries sender ids only and leaves form controls alone.
    pub fn is_form_submission(&self) -> bool {
        self.form_submitted || !self.form_values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    /// The client must re-issue the exchange as a full request.
    Retry,
}

/// A submitted value that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub element_id: Option<ElementIdPath>,
    pub key: String,
    pub message: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: ResponseStatus,
    pub page_id: u64,
    pub page_name: String,
    pub content: String,
    #[serde(default)]
    pub field_errors: Vec<FieldError>,
    /// Element ids emitted into the content during render.
    #[serde(default)]
    pub element_ids: Vec<ElementIdPath>,
    /// Cursor trace of every walk of the exchange, when tracing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_trace: Option<Vec<String>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Exchange-wide state shared by every binding evaluation of one exchange.
pub struct Environment {
    app: Application,
    request: Request,
    locale: String,
    resources: Arc<dyn ResourceManager>,
    errors: Mutex<Vec<FieldError>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("session", &self.request.session_id)
            .field("locale", &self.locale)
            .finish()
    }
}

impl Environment {
    pub fn new(app: Application, request: Request) -> Self {
        let locale = request
            .locale
            .clone()
            .unwrap_or_else(|| app.config().default_locale.clone());
        let resources = app.resource_manager(&locale);
        Environment {
            app,
            request,
            locale,
            resources,
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn resources(&self) -> &Arc<dyn ResourceManager> {
        &self.resources
    }

    pub fn record_error(&self, error: FieldError) {
        debug!(key = %error.key, message = %error.message, "recorded field error");
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }

    pub fn field_errors(&self) -> Vec<FieldError> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs one exchange. The cursor belongs to the context and is reset at the
/// start of every phase walk, so each walk replays the same coordinates.
pub struct RequestContext {
    env: Environment,
    cursor: Box<dyn ElementIdCursor>,
}

impl RequestContext {
    pub fn new(app: Application, request: Request) -> Self {
        let cursor: Box<dyn ElementIdCursor> = if app.config().trace_element_ids {
            Box::new(TracingCursor::new())
        } else {
            Box::new(ElementIdGenerator::new())
        };
        Self::with_cursor(app, request, cursor)
    }

    pub fn with_cursor(app: Application, request: Request, cursor: Box<dyn ElementIdCursor>) -> Self {
        RequestContext {
            env: Environment::new(app, request),
            cursor,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Runs the exchange against the session's pages.
    pub fn process(&mut self, state: &mut SessionState) -> RuntimeResult<Response> {
        let app = self.env.app().clone();
        let request = self.env.request().clone();

        let (mut page_id, submitted) = match request.page_id {
            Some(id) => match self.refresh_stale_page(state, id)? {
                Some(replacement) => (replacement, false),
                None => (id, true),
            },
            None => {
                let name = request
                    .page_name
                    .clone()
                    .unwrap_or_else(|| app.config().main_page.clone());
                (state.create_page(&app, &name)?, false)
            }
        };

        if submitted {
            if request.is_form_submission() {
                let page = state.page_mut(page_id)?;
                let (outcome, _) = self.run_phase(page, Phase::ApplyValues, None);
                if let Some(response) = self.settle(outcome, page_id, page.name())? {
                    return Ok(response);
                }
            }

            for sender in &request.sender_ids {
                let page = state.page_mut(page_id)?;
                let (outcome, output) = self.run_phase(page, Phase::InvokeAction, Some(sender.clone()));
                if let Some(response) = self.settle(outcome, page_id, page.name())? {
                    return Ok(response);
                }
                match output.action_result {
                    Some(Value::String(next)) => {
                        info!(sender = %sender, page = %next, "action switched page");
                        page_id = state.create_page(&app, &next)?;
                        break;
                    }
                    Some(Value::Null) | None => {}
                    Some(other) => {
                        warn!(sender = %sender, result = %other, "ignoring action result that names no page");
                    }
                }
            }
        }

        let page = state.page_mut(page_id)?;
        let (outcome, output) = self.run_phase(page, Phase::Render, None);
        if let Some(response) = self.settle(outcome, page_id, page.name())? {
            return Ok(response);
        }
        Ok(Response {
            status: ResponseStatus::Ok,
            page_id,
            page_name: page.name().to_string(),
            content: output.content,
            field_errors: self.env.field_errors(),
            element_ids: output.emitted,
            element_trace: self.cursor.trace().map(<[String]>::to_vec),
        })
    }

    /// Walks `page` once for `phase`.
    pub(crate) fn run_phase(
        &mut self,
        page: &mut Page,
        phase: Phase,
        target: Option<ElementIdPath>,
    ) -> (PhaseOutcome, PhaseOutput) {
        debug!(page = page.id(), %phase, target = ?target.as_ref().map(|t| t.to_string()), "walking page");
        let walker = TreeWalker::new(&self.env, page, self.cursor.as_mut(), phase, target);
        let (result, output) = walker.run();
        if let Err(e) = &result {
            if e.is_rendezvous() {
                warn!(page = page.id(), error = %e, trace = ?self.cursor.trace(), "rendezvous failed");
            }
        }
        let outcome = if output.retry {
            PhaseOutcome::Retry
        } else {
            PhaseOutcome::from(result)
        };
        (outcome, output)
    }

    /// `Ok(Some)` when the phase ended the exchange early.
    fn settle(
        &self,
        outcome: PhaseOutcome,
        page_id: u64,
        page_name: &str,
    ) -> RuntimeResult<Option<Response>> {
        match outcome {
            PhaseOutcome::Continue => Ok(None),
            PhaseOutcome::Retry => {
                info!(page = page_id, "exchange short-circuited for retry");
                Ok(Some(Response {
                    status: ResponseStatus::Retry,
                    page_id,
                    page_name: page_name.to_string(),
                    content: String::new(),
                    field_errors: self.env.field_errors(),
                    element_ids: Vec::new(),
                    element_trace: None,
                }))
            }
            PhaseOutcome::Fatal(error) => Err(error),
        }
    }

    /// Checks a page created before the last class reload. Outside debug
    /// mode the page keeps the definitions it was built with, unless its root
    /// class changed, which is `StalePageRoot`. In debug mode a page whose
    /// root is unchanged is rebound to the current classes, and its stale
    /// stateful children are replaced during the walk. A changed root gets a
    /// fresh page of the same name; the submission no longer matches the
    /// tree and is dropped.
    fn refresh_stale_page(&self, state: &mut SessionState, id: u64) -> RuntimeResult<Option<u64>> {
        let app = self.env.app();
        let page = state.page_mut(id)?;
        if page.generation() == app.generation() {
            return Ok(None);
        }
        let current = app.definition(page.name())?;
        let root_unchanged = current.fingerprint() == page.definition().fingerprint();
        match (app.config().debug, root_unchanged) {
            (false, true) => Ok(None),
            (false, false) => Err(RuntimeError::StalePageRoot(page.name().to_string())),
            (true, true) => {
                page.rebind(current, app.generation());
                Ok(None)
            }
            (true, false) => {
                let name = page.name().to_string();
                warn!(page = id, %name, "replacing page built from a reloaded class");
                state.remove(id);
                state.create_page(app, &name).map(Some)
            }
        }
    }
}

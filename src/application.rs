//! Application Module for Zenith Runtime
//!
//! The explicit application context: registered classes, the definition
//! cache, class accessors, formatters, localization, validation records and
//! sessions. Cheap to clone; every clone shares the same state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::binding::{builtin_formatters, set_nested, Formatter, ParseEnv};
use crate::builtin::register_builtins;
use crate::config::RuntimeConfig;
use crate::definition::{ComponentClass, ComponentDefinition};
use crate::error::{BindingError, RuntimeError, RuntimeResult};
use crate::localization::{Localization, ResourceManager, StringTables};
use crate::request::{Request, RequestContext, Response};
use crate::session::Session;
use crate::validate::{ValidationContext, ValidationRecord};
use crate::value::Value;

struct AppInner {
    config: RuntimeConfig,
    classes: RwLock<HashMap<String, Arc<ComponentClass>>>,
    definitions: RwLock<HashMap<String, Arc<ComponentDefinition>>>,
    statics: RwLock<HashMap<String, Value>>,
    formatters: RwLock<HashMap<String, Arc<dyn Formatter>>>,
    localization: RwLock<Arc<dyn Localization>>,
    validation: ValidationContext,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.inner.config)
            .field("generation", &self.generation())
            .finish()
    }
}

impl Default for Application {
    fn default() -> Self {
        Application::new(RuntimeConfig::default())
    }
}

impl Application {
    /// An application with the built-in components and formatters registered.
    pub fn new(config: RuntimeConfig) -> Self {
        let formatters = builtin_formatters()
            .into_iter()
            .map(|(name, formatter)| (name.to_string(), formatter))
            .collect();
        let app = Application {
            inner: Arc::new(AppInner {
                validation: ValidationContext::new(config.strict_validation),
                config,
                classes: RwLock::new(HashMap::new()),
                definitions: RwLock::new(HashMap::new()),
                statics: RwLock::new(HashMap::new()),
                formatters: RwLock::new(formatters),
                localization: RwLock::new(Arc::new(StringTables::new())),
                sessions: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        };
        register_builtins(&app);
        app
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn validation(&self) -> &ValidationContext {
        &self.inner.validation
    }

    pub fn validation_records(&self) -> Vec<ValidationRecord> {
        self.inner.validation.records()
    }

    /// Bumped by every `reload_class`.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLASSES AND DEFINITIONS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn register(&self, class: ComponentClass) -> RuntimeResult<()> {
        let mut classes = self
            .inner
            .classes
            .write()
            .map_err(|_| RuntimeError::Poisoned("class table"))?;
        if classes.contains_key(class.name()) {
            return Err(RuntimeError::Config(format!(
                "component '{}' is already registered",
                class.name()
            )));
        }
        debug!(component = %class.name(), "registered component class");
        classes.insert(class.name().to_string(), Arc::new(class));
        Ok(())
    }

    /// Replaces a registered class. Cached definitions are dropped, so pages
    /// and templates materialized from now on use the new class.
    pub fn reload_class(&self, class: ComponentClass) -> RuntimeResult<()> {
        let name = class.name().to_string();
        self.inner
            .classes
            .write()
            .map_err(|_| RuntimeError::Poisoned("class table"))?
            .insert(name.clone(), Arc::new(class));
        // Templates that reference the class hold its old definition too.
        self.inner
            .definitions
            .write()
            .map_err(|_| RuntimeError::Poisoned("definition cache"))?
            .clear();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(component = %name, generation, "reloaded component class");
        Ok(())
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.inner
            .classes
            .read()
            .map(|classes| classes.contains_key(name))
            .unwrap_or(false)
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .classes
            .read()
            .map(|classes| classes.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// The cached definition for `name`, created on first use.
    pub fn definition(&self, name: &str) -> RuntimeResult<Arc<ComponentDefinition>> {
        if let Some(definition) = self
            .inner
            .definitions
            .read()
            .map_err(|_| RuntimeError::Poisoned("definition cache"))?
            .get(name)
        {
            return Ok(definition.clone());
        }

        let class = self
            .inner
            .classes
            .read()
            .map_err(|_| RuntimeError::Poisoned("class table"))?
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownComponent(name.to_string()))?;

        let mut definitions = self
            .inner
            .definitions
            .write()
            .map_err(|_| RuntimeError::Poisoned("definition cache"))?;
        // Another exchange may have won the race.
        if let Some(definition) = definitions.get(name) {
            return Ok(definition.clone());
        }
        let definition = Arc::new(ComponentDefinition::new(
            class,
            self.generation(),
            &self.inner.config,
        ));
        definitions.insert(name.to_string(), definition.clone());
        Ok(definition)
    }

    /// Materializes every registered template in parallel and returns the
    /// validation records collected so far.
    pub fn validate_all(&self) -> RuntimeResult<Vec<ValidationRecord>> {
        self.class_names()
            .par_iter()
            .map(|name| self.definition(name)?.template(self).map(|_| ()))
            .collect::<RuntimeResult<Vec<()>>>()?;
        Ok(self.validation_records())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLASS ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Makes `value` reachable from bindings as `name.keypath`.
    pub fn register_static(&self, name: &str, value: Value) {
        if let Ok(mut statics) = self.inner.statics.write() {
            statics.insert(name.to_string(), value);
        }
    }

    pub fn has_static(&self, name: &str) -> bool {
        self.inner
            .statics
            .read()
            .map(|statics| statics.contains_key(name))
            .unwrap_or(false)
    }

    pub fn static_value(&self, name: &str) -> Option<Value> {
        self.inner.statics.read().ok()?.get(name).cloned()
    }

    pub fn set_static_path(&self, name: &str, path: &[String], value: Value) -> RuntimeResult<()> {
        let mut statics = self
            .inner
            .statics
            .write()
            .map_err(|_| RuntimeError::Poisoned("class accessors"))?;
        let target = statics
            .get_mut(name)
            .ok_or_else(|| BindingError::UnknownClass(name.to_string()))?;
        set_nested(target, path, value).map_err(|message| {
            BindingError::SetFailed {
                object: name.to_string(),
                keypath: path.join("."),
                message,
            }
            .into()
        })
    }

    pub fn parse_env(&self) -> ParseEnv {
        let names: Vec<String> = self
            .inner
            .statics
            .read()
            .map(|statics| statics.keys().cloned().collect())
            .unwrap_or_default();
        ParseEnv::with_classes(names)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FORMATTERS AND LOCALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn register_formatter(&self, name: &str, formatter: Arc<dyn Formatter>) {
        if let Ok(mut formatters) = self.inner.formatters.write() {
            formatters.insert(name.to_string(), formatter);
        }
    }

    pub fn formatter(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        self.inner.formatters.read().ok()?.get(name).cloned()
    }

    pub fn set_localization(&self, localization: Arc<dyn Localization>) {
        if let Ok(mut current) = self.inner.localization.write() {
            *current = localization;
        }
    }

    pub fn resource_manager(&self, locale: &str) -> Arc<dyn ResourceManager> {
        match self.inner.localization.read() {
            Ok(localization) => localization.resource_manager(locale),
            Err(_) => StringTables::new().resource_manager(locale),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXCHANGES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn session(&self, id: &str) -> RuntimeResult<Arc<Session>> {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .map_err(|_| RuntimeError::Poisoned("sessions"))?;
        Ok(sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id, self.inner.config.page_cache_size)))
            .clone())
    }

    pub fn end_session(&self, id: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .map(|mut sessions| sessions.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Runs one exchange to completion.
    #[instrument(skip(self, request), fields(session = %request.session_id, page = ?request.page_id))]
    pub fn handle(&self, request: Request) -> RuntimeResult<Response> {
        let session = self.session(&request.session_id)?;
        let mut state = session.lock()?;
        let mut context = RequestContext::new(self.clone(), request);
        let response = context.process(&mut state)?;
        debug!(page = response.page_id, status = ?response.status, "exchange complete");
        Ok(response)
    }
}

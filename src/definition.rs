//! Definition Module for Zenith Runtime
//!
//! `ComponentClass` is what an application registers. `ComponentDefinition`
//! is created from it lazily, on first use of the name, and cached for the
//! life of the application (or until the class is reloaded).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::application::Application;
use crate::binding::Binding;
use crate::component::{any_mut, Component};
use crate::config::RuntimeConfig;
use crate::error::RuntimeResult;
use crate::fields::FieldTable;
use crate::pool::{Checkout, InstancePool, PoolStats};
use crate::template::{materialize, Template, TemplateSource};
use crate::validate::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pooling {
    /// Each occurrence owns a pool; bindings stay pinned to its instances.
    Local,
    /// One instance per definition, bindings pushed and cleared per borrow.
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    /// Persisted in the page, keyed by element id.
    Stateful,
    Stateless(Pooling),
}

impl ComponentKind {
    pub fn is_stateful(self) -> bool {
        matches!(self, ComponentKind::Stateful)
    }
}

pub type Factory = Arc<dyn Fn() -> Box<dyn Component> + Send + Sync>;

/// Bindings a component declares for its occurrences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingRequirements {
    #[serde(default)]
    pub required: Vec<String>,
    /// `None` accepts any binding name.
    #[serde(default)]
    pub supported: Option<Vec<String>>,
    #[serde(default)]
    pub directions: HashMap<String, Direction>,
    #[serde(default)]
    pub requires_content: bool,
}

impl BindingRequirements {
    pub fn direction(&self, name: &str) -> Direction {
        self.directions.get(name).copied().unwrap_or_default()
    }

    pub fn is_supported(&self, name: &str) -> bool {
        match &self.supported {
            Some(supported) => {
                supported.iter().any(|s| s == name) || self.required.iter().any(|r| r == name)
            }
            None => true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT CLASS
// ═══════════════════════════════════════════════════════════════════════════════

/// Registration record of one component type.
#[derive(Clone)]
pub struct ComponentClass {
    name: String,
    kind: ComponentKind,
    factory: Factory,
    fields: FieldTable,
    template: Option<Vec<TemplateSource>>,
    requirements: BindingRequirements,
    dynamic_keys: bool,
}

impl std::fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .finish()
    }
}

impl ComponentClass {
    /// A stateless, shared-slot class built with `T::default()`.
    pub fn new<T: Component + Default>(name: &str) -> Self {
        Self::with_factory(name, || Box::new(T::default()))
    }

    pub fn with_factory<F>(name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Component> + Send + Sync + 'static,
    {
        ComponentClass {
            name: name.to_string(),
            kind: ComponentKind::Stateless(Pooling::Shared),
            factory: Arc::new(factory),
            fields: FieldTable::default(),
            template: None,
            requirements: BindingRequirements::default(),
            dynamic_keys: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stateful(mut self) -> Self {
        self.kind = ComponentKind::Stateful;
        self
    }

    pub fn pooled_locally(mut self) -> Self {
        self.kind = ComponentKind::Stateless(Pooling::Local);
        self
    }

    pub fn fields(mut self, fields: FieldTable) -> Self {
        self.fields = fields;
        self
    }

    pub fn template(mut self, template: Vec<TemplateSource>) -> Self {
        self.template = Some(template);
        self
    }

    pub fn template_json(self, json: &str) -> RuntimeResult<Self> {
        let template = TemplateSource::parse_list(json)?;
        Ok(self.template(template))
    }

    pub fn required(mut self, names: &[&str]) -> Self {
        self.requirements
            .required
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn supported(mut self, names: &[&str]) -> Self {
        self.requirements
            .supported
            .get_or_insert_with(Vec::new)
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn direction(mut self, name: &str, direction: Direction) -> Self {
        self.requirements
            .directions
            .insert(name.to_string(), direction);
        self
    }

    pub fn requires_content(mut self) -> Self {
        self.requirements.requires_content = true;
        self
    }

    /// Keys outside the field table are served by `Component::value_for_key`.
    pub fn dynamic_keys(mut self) -> Self {
        self.dynamic_keys = true;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED SLOT
// ═══════════════════════════════════════════════════════════════════════════════

/// The shared instance of a non-locally-pooled class. The instance is moved
/// out for the duration of a borrow; nested or concurrent demand is served by
/// the bounded overflow behind it, then by transient instances. Bindings
/// never survive a checkin.
#[derive(Debug)]
pub struct SharedSlot {
    pool: InstancePool,
}

impl SharedSlot {
    fn new(overflow: usize) -> Self {
        SharedSlot {
            pool: InstancePool::new(1 + overflow),
        }
    }

    pub fn checkout(
        &self,
        definition: &ComponentDefinition,
        bindings: &BTreeMap<String, Arc<Binding>>,
    ) -> RuntimeResult<(Box<dyn Component>, Checkout)> {
        let (mut instance, origin) = self.pool.checkout(|| definition.instantiate())?;
        definition
            .fields()
            .push_bindings(any_mut(instance.as_mut()), bindings);
        Ok((instance, origin))
    }

    pub fn checkin(
        &self,
        definition: &ComponentDefinition,
        mut instance: Box<dyn Component>,
    ) -> RuntimeResult<()> {
        definition.fields().clear_bindings(any_mut(instance.as_mut()));
        self.pool.checkin(instance)
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ComponentDefinition {
    class: Arc<ComponentClass>,
    fingerprint: String,
    generation: u64,
    template: OnceLock<Arc<Template>>,
    shared: Option<SharedSlot>,
    local_pool_capacity: usize,
}

impl std::fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.class.name)
            .field("kind", &self.class.kind)
            .field("fingerprint", &self.fingerprint)
            .field("generation", &self.generation)
            .finish()
    }
}

impl ComponentDefinition {
    pub fn new(class: Arc<ComponentClass>, generation: u64, config: &RuntimeConfig) -> Self {
        let shared = match class.kind {
            ComponentKind::Stateless(Pooling::Shared) => {
                Some(SharedSlot::new(config.shared_overflow_capacity))
            }
            _ => None,
        };
        let fingerprint = fingerprint(&class);
        debug!(component = %class.name, %fingerprint, "created component definition");
        ComponentDefinition {
            class,
            fingerprint,
            generation,
            template: OnceLock::new(),
            shared,
            local_pool_capacity: config.local_pool_capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.class.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.class.kind
    }

    pub fn is_stateful(&self) -> bool {
        self.class.kind.is_stateful()
    }

    pub fn fields(&self) -> &FieldTable {
        &self.class.fields
    }

    pub fn requirements(&self) -> &BindingRequirements {
        &self.class.requirements
    }

    pub fn dynamic_keys(&self) -> bool {
        self.class.dynamic_keys
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn shared_slot(&self) -> Option<&SharedSlot> {
        self.shared.as_ref()
    }

    /// A pool for one occurrence of a locally pooled class.
    pub(crate) fn new_local_pool(&self) -> Option<InstancePool> {
        match self.class.kind {
            ComponentKind::Stateless(Pooling::Local) => {
                Some(InstancePool::new(self.local_pool_capacity))
            }
            _ => None,
        }
    }

    pub fn instantiate(&self) -> Box<dyn Component> {
        (self.class.factory)()
    }

    /// The materialized template. Built on first use; classes without a
    /// template pass their occurrence's content through.
    pub fn template(&self, app: &Application) -> RuntimeResult<Arc<Template>> {
        if let Some(template) = self.template.get() {
            return Ok(template.clone());
        }
        let nodes = match &self.class.template {
            Some(sources) => materialize(self, sources, app)?,
            None => materialize(self, &[TemplateSource::Content], app)?,
        };
        debug!(component = %self.class.name, nodes = nodes.len(), "materialized template");
        let built = Arc::new(Template::new(nodes));
        Ok(self.template.get_or_init(|| built).clone())
    }

    pub fn is_template_materialized(&self) -> bool {
        self.template.get().is_some()
    }
}

fn fingerprint(class: &ComponentClass) -> String {
    let mut hasher = Sha256::new();
    hasher.update(class.name.as_bytes());
    hasher.update(format!("{:?}", class.kind).as_bytes());
    for key in class.fields.key_names() {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
    }
    for slot in class.fields.slot_names() {
        hasher.update(slot.as_bytes());
        hasher.update([1u8]);
    }
    if let Some(template) = &class.template {
        if let Ok(json) = serde_json::to_string(template) {
            hasher.update(json.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Label {
        text: String,
        text_binding: Option<Arc<Binding>>,
    }

    impl Component for Label {}

    fn label_class() -> ComponentClass {
        ComponentClass::new::<Label>("Label").fields(
            FieldTable::builder::<Label>()
                .field("text", |l| json!(l.text), |l, v| {
                    l.text = v.as_str().unwrap_or_default().to_string();
                    Ok(())
                })
                .binding_slot("text", |l, b| l.text_binding = b)
                .build(),
        )
    }

    #[test]
    fn test_kinds_and_slots() {
        let config = RuntimeConfig::default();
        let shared = ComponentDefinition::new(Arc::new(label_class()), 0, &config);
        assert!(shared.shared_slot().is_some());
        assert!(shared.new_local_pool().is_none());

        let local = ComponentDefinition::new(Arc::new(label_class().pooled_locally()), 0, &config);
        assert!(local.shared_slot().is_none());
        assert_eq!(local.new_local_pool().map(|p| p.capacity()), Some(4));

        let stateful = ComponentDefinition::new(Arc::new(label_class().stateful()), 0, &config);
        assert!(stateful.is_stateful());
        assert!(stateful.shared_slot().is_none());
    }

    #[test]
    fn test_fingerprint_tracks_shape() {
        let a = fingerprint(&label_class());
        let b = fingerprint(&label_class());
        let c = fingerprint(&label_class().stateful());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_shared_slot_clears_bindings() {
        let config = RuntimeConfig::default();
        let definition = ComponentDefinition::new(Arc::new(label_class()), 0, &config);
        let slot = definition.shared_slot().unwrap();

        let mut first = BTreeMap::new();
        first.insert("text".to_string(), Arc::new(Binding::constant(json!("first"))));
        let (mut instance, origin) = slot.checkout(&definition, &first).unwrap();
        assert_eq!(origin, Checkout::Created);
        let label = any_mut(instance.as_mut()).downcast_mut::<Label>().unwrap();
        assert!(label.text_binding.is_some());
        slot.checkin(&definition, instance).unwrap();

        let (mut instance, origin) = slot.checkout(&definition, &BTreeMap::new()).unwrap();
        assert_eq!(origin, Checkout::Recycled);
        let label = any_mut(instance.as_mut()).downcast_mut::<Label>().unwrap();
        assert!(label.text_binding.is_none());
        slot.checkin(&definition, instance).unwrap();
        assert_eq!(slot.stats().created, 1);
    }

    #[test]
    fn test_shared_slot_lends_transients_when_exhausted() {
        let config = RuntimeConfig {
            shared_overflow_capacity: 1,
            ..RuntimeConfig::default()
        };
        let definition = ComponentDefinition::new(Arc::new(label_class()), 0, &config);
        let slot = definition.shared_slot().unwrap();
        let bindings = BTreeMap::new();

        let (first, _) = slot.checkout(&definition, &bindings).unwrap();
        let (second, _) = slot.checkout(&definition, &bindings).unwrap();
        let (third, origin) = slot.checkout(&definition, &bindings).unwrap();
        assert_eq!(origin, Checkout::Transient);
        assert_eq!(slot.stats().outstanding, 2);

        drop(third);
        slot.checkin(&definition, second).unwrap();
        slot.checkin(&definition, first).unwrap();
        let stats = slot.stats();
        assert_eq!((stats.outstanding, stats.created, stats.transient), (0, 2, 1));
    }
}

//! Field Tables
//!
//! The registration-time table that maps binding and key names to typed
//! accessors of one component type. Built once per component class and
//! shared by every instance and every occurrence.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::Binding;
use crate::component::Component;
use crate::value::Value;

type Getter = Arc<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;
type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> Option<Result<(), String>> + Send + Sync>;
type ActionFn = Arc<dyn Fn(&mut dyn Any) -> Option<Value> + Send + Sync>;
type SlotFn = Arc<dyn Fn(&mut dyn Any, Option<Arc<Binding>>) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Accessor {
    Field {
        get: Option<Getter>,
        set: Option<Setter>,
    },
    Action(ActionFn),
}

impl Accessor {
    /// Actions count as readable: reading one runs it.
    pub fn has_getter(&self) -> bool {
        matches!(self, Accessor::Field { get: Some(_), .. } | Accessor::Action(_))
    }

    pub fn has_setter(&self) -> bool {
        matches!(self, Accessor::Field { set: Some(_), .. })
    }
}

/// Outcome of an accessor call that could not reach the value.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessError {
    /// The instance is not of the table's type.
    TypeMismatch,
    ReadOnly,
    WriteOnly,
    Rejected(String),
}

#[derive(Clone, Default)]
pub struct FieldTable {
    type_name: &'static str,
    accessors: HashMap<String, Accessor>,
    slots: BTreeMap<String, SlotFn>,
}

impl std::fmt::Debug for FieldTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldTable")
            .field("type_name", &self.type_name)
            .field("keys", &self.key_names())
            .field("slots", &self.slot_names())
            .finish()
    }
}

impl FieldTable {
    pub fn builder<T: Component>() -> FieldTableBuilder<T> {
        FieldTableBuilder {
            table: FieldTable {
                type_name: std::any::type_name::<T>(),
                accessors: HashMap::new(),
                slots: BTreeMap::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn accessor(&self, key: &str) -> Option<&Accessor> {
        self.accessors.get(key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.accessors.contains_key(key)
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Sorted key names, used for fingerprints and diagnostics.
    pub fn key_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.accessors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn slot_names(&self) -> Vec<&str> {
        self.slots.keys().map(String::as_str).collect()
    }

    /// Reads a key. Actions are invoked, which is why the instance is `&mut`.
    pub fn get(&self, instance: &mut dyn Any, key: &str) -> Option<Result<Value, AccessError>> {
        let accessor = self.accessors.get(key)?;
        Some(match accessor {
            Accessor::Field { get: Some(get), .. } => {
                get(&*instance).ok_or(AccessError::TypeMismatch)
            }
            Accessor::Field { get: None, .. } => Err(AccessError::WriteOnly),
            Accessor::Action(action) => action(instance).ok_or(AccessError::TypeMismatch),
        })
    }

    pub fn set(
        &self,
        instance: &mut dyn Any,
        key: &str,
        value: Value,
    ) -> Option<Result<(), AccessError>> {
        let accessor = self.accessors.get(key)?;
        Some(match accessor {
            Accessor::Field { set: Some(set), .. } => match set(instance, value) {
                Some(Ok(())) => Ok(()),
                Some(Err(message)) => Err(AccessError::Rejected(message)),
                None => Err(AccessError::TypeMismatch),
            },
            _ => Err(AccessError::ReadOnly),
        })
    }

    /// Stores the occurrence's binding (or clears it) in every declared slot.
    pub fn push_bindings(&self, instance: &mut dyn Any, bindings: &BTreeMap<String, Arc<Binding>>) {
        for (name, slot) in &self.slots {
            slot(instance, bindings.get(name).cloned());
        }
    }

    pub fn clear_bindings(&self, instance: &mut dyn Any) {
        for slot in self.slots.values() {
            slot(instance, None);
        }
    }
}

pub struct FieldTableBuilder<T> {
    table: FieldTable,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> FieldTableBuilder<T> {
    /// A readable and writable key.
    pub fn field<G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> Result<(), String> + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |any: &dyn Any| any.downcast_ref::<T>().map(&get));
        let setter: Setter = Arc::new(move |any: &mut dyn Any, value: Value| {
            any.downcast_mut::<T>().map(|target| set(target, value))
        });
        self.table.accessors.insert(
            name.to_string(),
            Accessor::Field {
                get: Some(getter),
                set: Some(setter),
            },
        );
        self
    }

    pub fn read_only<G>(mut self, name: &str, get: G) -> Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |any: &dyn Any| any.downcast_ref::<T>().map(&get));
        self.table
            .accessors
            .insert(
                name.to_string(),
                Accessor::Field {
                    get: Some(getter),
                    set: None,
                },
            );
        self
    }

    /// A key that only accepts writes, such as a submitted password.
    pub fn write_only<S>(mut self, name: &str, set: S) -> Self
    where
        S: Fn(&mut T, Value) -> Result<(), String> + Send + Sync + 'static,
    {
        let setter: Setter = Arc::new(move |any: &mut dyn Any, value: Value| {
            any.downcast_mut::<T>().map(|target| set(target, value))
        });
        self.table.accessors.insert(
            name.to_string(),
            Accessor::Field {
                get: None,
                set: Some(setter),
            },
        );
        self
    }

    /// A key whose read runs an action. The returned value is the action
    /// result: `null` stays on the page, a string names the next page.
    pub fn action<F>(mut self, name: &str, action: F) -> Self
    where
        F: Fn(&mut T) -> Value + Send + Sync + 'static,
    {
        let action: ActionFn =
            Arc::new(move |any: &mut dyn Any| any.downcast_mut::<T>().map(&action));
        self.table
            .accessors
            .insert(name.to_string(), Accessor::Action(action));
        self
    }

    /// Storage for the binding object of the given name.
    pub fn binding_slot<F>(mut self, name: &str, store: F) -> Self
    where
        F: Fn(&mut T, Option<Arc<Binding>>) + Send + Sync + 'static,
    {
        let slot: SlotFn = Arc::new(move |any: &mut dyn Any, binding| match any.downcast_mut::<T>() {
            Some(target) => {
                store(target, binding);
                true
            }
            None => false,
        });
        self.table.slots.insert(name.to_string(), slot);
        self
    }

    pub fn build(self) -> FieldTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        count: i64,
        label: String,
        secret: String,
        value_binding: Option<Arc<Binding>>,
    }

    impl Component for Counter {}

    fn table() -> FieldTable {
        FieldTable::builder::<Counter>()
            .field(
                "count",
                |c| json!(c.count),
                |c, v| {
                    c.count = v.as_i64().ok_or("count must be an integer")?;
                    Ok(())
                },
            )
            .read_only("label", |c| json!(c.label))
            .write_only("secret", |c, v| {
                c.secret = v.as_str().unwrap_or_default().to_string();
                Ok(())
            })
            .action("increment", |c| {
                c.count += 1;
                Value::Null
            })
            .binding_slot("value", |c, b| c.value_binding = b)
            .build()
    }

    #[test]
    fn test_get_set() {
        let table = table();
        let mut counter = Counter::default();
        assert_eq!(table.set(&mut counter, "count", json!(5)), Some(Ok(())));
        assert_eq!(table.get(&mut counter, "count"), Some(Ok(json!(5))));
        assert_eq!(
            table.set(&mut counter, "count", json!("x")),
            Some(Err(AccessError::Rejected("count must be an integer".into())))
        );
        assert_eq!(
            table.set(&mut counter, "label", json!("x")),
            Some(Err(AccessError::ReadOnly))
        );
        assert!(table.get(&mut counter, "missing").is_none());
    }

    #[test]
    fn test_write_only_key() {
        let table = table();
        let mut counter = Counter::default();
        assert_eq!(table.set(&mut counter, "secret", json!("hunter2")), Some(Ok(())));
        assert_eq!(counter.secret, "hunter2");
        assert_eq!(
            table.get(&mut counter, "secret"),
            Some(Err(AccessError::WriteOnly))
        );
        let accessor = table.accessor("secret").unwrap();
        assert!(!accessor.has_getter());
        assert!(accessor.has_setter());
        assert!(table.accessor("label").unwrap().has_getter());
    }

    #[test]
    fn test_action_runs_on_read() {
        let table = table();
        let mut counter = Counter::default();
        assert_eq!(table.get(&mut counter, "increment"), Some(Ok(Value::Null)));
        assert_eq!(counter.count, 1);
        assert!(!table.accessor("increment").unwrap().has_setter());
    }

    #[test]
    fn test_type_mismatch() {
        let table = table();
        let mut other = String::from("not a counter");
        assert_eq!(
            table.get(&mut other, "count"),
            Some(Err(AccessError::TypeMismatch))
        );
    }

    #[test]
    fn test_binding_slots() {
        let table = table();
        let mut counter = Counter::default();
        let mut bindings = BTreeMap::new();
        bindings.insert("value".to_string(), Arc::new(Binding::constant(json!(1))));
        table.push_bindings(&mut counter, &bindings);
        assert!(counter.value_binding.is_some());
        table.clear_bindings(&mut counter);
        assert!(counter.value_binding.is_none());
        assert_eq!(table.slot_names(), vec!["value"]);
    }
}

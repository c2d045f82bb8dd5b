use std::sync::Arc;

use crate::component::{any_mut, Component};
use crate::definition::ComponentDefinition;
use crate::element_id::ElementIdPath;
use crate::error::BindingError;
use crate::fields::AccessError;
use crate::reference::ComponentReference;
use crate::request::Environment;
use crate::value::{get_key, set_key, Value};

/// How a frame's instance goes back once its node has been walked.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lease {
    Root,
    Pooled,
    Shared,
    /// Lent while the pool was exhausted; dropped at release.
    Transient,
    Stateful(ElementIdPath),
    /// Built for a one-off evaluation, dropped afterwards.
    Detached,
}

/// One node on the active path of a walk.
pub struct Frame {
    pub(crate) instance: Box<dyn Component>,
    pub(crate) definition: Arc<ComponentDefinition>,
    pub(crate) reference: Option<Arc<ComponentReference>>,
    /// Index of the frame this node's bindings evaluate against.
    pub(crate) context: Option<usize>,
    pub(crate) element_id: ElementIdPath,
    pub(crate) lease: Lease,
}

impl Frame {
    /// A frame outside any walk, for evaluating bindings against `instance`.
    pub fn detached(instance: Box<dyn Component>, definition: Arc<ComponentDefinition>) -> Self {
        Frame {
            instance,
            definition,
            reference: None,
            context: None,
            element_id: ElementIdPath::root(),
            lease: Lease::Detached,
        }
    }

    pub fn definition(&self) -> &Arc<ComponentDefinition> {
        &self.definition
    }

    pub fn instance_mut(&mut self) -> &mut dyn Component {
        self.instance.as_mut()
    }

    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        any_mut(self.instance.as_mut()).downcast_mut::<T>()
    }
}

/// The parent chain a binding is evaluated against. The last frame is the
/// context object; frames are borrowed for one evaluation only.
pub struct Scope<'a> {
    frames: &'a mut [Frame],
    env: &'a Environment,
}

impl<'a> Scope<'a> {
    pub fn new(frames: &'a mut [Frame], env: &'a Environment) -> Self {
        Scope { frames, env }
    }

    pub fn env(&self) -> &Environment {
        self.env
    }

    pub fn has_context(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Name of the component definition acting as the context object.
    pub fn context_name(&self) -> &str {
        self.frames
            .last()
            .map(|f| f.definition.name())
            .unwrap_or("<none>")
    }

    pub(crate) fn context_definition(&self) -> Option<&Arc<ComponentDefinition>> {
        self.frames.last().map(|f| &f.definition)
    }

    pub fn value_for_key(&mut self, key: &str) -> Result<Value, BindingError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| BindingError::NoContext(key.to_string()))?;
        let object = frame.definition.name().to_string();
        match frame.definition.fields().get(any_mut(frame.instance.as_mut()), key) {
            Some(Ok(value)) => Ok(value),
            Some(Err(AccessError::WriteOnly)) => Err(BindingError::UnknownKey {
                object: format!("{} (write-only)", object),
                keypath: key.to_string(),
            }),
            Some(Err(_)) => Err(BindingError::UnknownKey {
                object: format!("{} (type mismatch)", object),
                keypath: key.to_string(),
            }),
            None => frame
                .instance
                .value_for_key(key)
                .ok_or(BindingError::UnknownKey {
                    object,
                    keypath: key.to_string(),
                }),
        }
    }

    pub fn take_value_for_key(&mut self, key: &str, value: Value) -> Result<(), BindingError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| BindingError::NoContext(key.to_string()))?;
        let object = frame.definition.name().to_string();
        match frame
            .definition
            .fields()
            .set(any_mut(frame.instance.as_mut()), key, value.clone())
        {
            Some(Ok(())) => Ok(()),
            Some(Err(AccessError::ReadOnly)) => Err(BindingError::SetFailed {
                object,
                keypath: key.to_string(),
                message: "key is read-only".to_string(),
            }),
            Some(Err(AccessError::Rejected(message))) => Err(BindingError::SetFailed {
                object,
                keypath: key.to_string(),
                message,
            }),
            Some(Err(AccessError::TypeMismatch | AccessError::WriteOnly)) => Err(BindingError::UnknownKey {
                object: format!("{} (type mismatch)", object),
                keypath: key.to_string(),
            }),
            None => {
                if frame.instance.take_value_for_key(key, value) {
                    Ok(())
                } else {
                    Err(BindingError::UnknownKey {
                        object,
                        keypath: key.to_string(),
                    })
                }
            }
        }
    }

    /// Reads a dotted keypath: the first key on the context object, the
    /// rest inside the resulting value.
    pub fn value_for_keypath(&mut self, path: &[String]) -> Result<Value, BindingError> {
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => return Err(BindingError::NoContext(String::new())),
        };
        let mut value = self.value_for_key(first)?;
        for key in rest {
            value = get_key(&value, key).unwrap_or(Value::Null);
        }
        Ok(value)
    }

    /// Writes a dotted keypath. Nested writes modify a copy of the root value
    /// and store it back through the first key.
    pub fn take_value_for_keypath(&mut self, path: &[String], value: Value) -> Result<(), BindingError> {
        match path {
            [] => Err(BindingError::NoContext(String::new())),
            [key] => self.take_value_for_key(key, value),
            [first, rest @ ..] => {
                let mut root = self.value_for_key(first)?;
                set_nested(&mut root, rest, value).map_err(|message| BindingError::SetFailed {
                    object: self.context_name().to_string(),
                    keypath: path.join("."),
                    message,
                })?;
                self.take_value_for_key(first, root)
            }
        }
    }

    /// The occurrence that created the context frame, if it binds `name`,
    /// with the index of the frame that binding evaluates against.
    pub(crate) fn parent_binding(&self, name: &str) -> Option<(Arc<ComponentReference>, Option<usize>)> {
        let frame = self.frames.last()?;
        let reference = frame.reference.as_ref()?;
        reference.binding(name)?;
        Some((reference.clone(), frame.context))
    }

    /// Scope over the prefix ending at `context`.
    pub(crate) fn rescope(&mut self, context: Option<usize>) -> Scope<'_> {
        let end = match context {
            Some(index) if index < self.frames.len() => index + 1,
            _ => 0,
        };
        Scope {
            frames: &mut self.frames[..end],
            env: self.env,
        }
    }
}

pub(crate) fn set_nested(target: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    match path {
        [] => {
            *target = value;
            Ok(())
        }
        [key] => {
            if set_key(target, key, value) {
                Ok(())
            } else {
                Err(format!("cannot set '{}' on {}", key, target))
            }
        }
        [key, rest @ ..] => {
            let child = match target {
                Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    Some(item) => item,
                    None => return Err(format!("no element '{}'", key)),
                },
                _ => return Err(format!("cannot descend into '{}'", key)),
            };
            set_nested(child, rest, value)
        }
    }
}

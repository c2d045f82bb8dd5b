//! Reference Module for Zenith Runtime
//!
//! A `ComponentReference` is one static occurrence of a component in a
//! template. Its bindings are parsed once at materialization and never change
//! afterwards; it decides where stateless instances come from and where they
//! go back to.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::binding::{Binding, Lease};
use crate::component::{any_mut, Component};
use crate::definition::{ComponentDefinition, ComponentKind, Pooling};
use crate::error::{RuntimeError, RuntimeResult};
use crate::pool::{Checkout, InstancePool, PoolStats};
use crate::template::TemplateNode;

pub struct ComponentReference {
    definition: Arc<ComponentDefinition>,
    bindings: BTreeMap<String, Arc<Binding>>,
    body: Vec<TemplateNode>,
    pool: Option<InstancePool>,
    location: String,
}

impl std::fmt::Debug for ComponentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentReference")
            .field("component", &self.definition.name())
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("location", &self.location)
            .finish()
    }
}

impl ComponentReference {
    pub fn new(
        definition: Arc<ComponentDefinition>,
        bindings: BTreeMap<String, Arc<Binding>>,
        body: Vec<TemplateNode>,
        location: String,
    ) -> Self {
        let pool = definition.new_local_pool();
        ComponentReference {
            definition,
            bindings,
            body,
            pool,
            location,
        }
    }

    pub fn definition(&self) -> &Arc<ComponentDefinition> {
        &self.definition
    }

    pub fn binding(&self, name: &str) -> Option<&Arc<Binding>> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &BTreeMap<String, Arc<Binding>> {
        &self.bindings
    }

    pub fn body(&self) -> &[TemplateNode] {
        &self.body
    }

    /// `<Name> in <Owner>`, used in error traces.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_stateless(&self) -> bool {
        !self.definition.is_stateful()
    }

    /// Statistics of this occurrence's own pool, for locally pooled classes.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(InstancePool::stats)
    }

    /// Builds a stateful instance with this occurrence's bindings assigned.
    pub(crate) fn create_stateful(&self) -> Box<dyn Component> {
        let mut instance = self.definition.instantiate();
        self.definition
            .fields()
            .push_bindings(any_mut(instance.as_mut()), &self.bindings);
        instance
    }

    /// Checks out a stateless instance. Locally pooled instances get this
    /// occurrence's bindings once, when they are constructed; shared ones get
    /// them on every checkout.
    pub(crate) fn acquire_stateless(&self) -> RuntimeResult<(Box<dyn Component>, Lease)> {
        match self.definition.kind() {
            ComponentKind::Stateless(Pooling::Local) => {
                let pool = self.pool.as_ref().ok_or_else(|| {
                    RuntimeError::component(self.definition.name(), "missing local pool")
                })?;
                let (mut instance, origin) = pool.checkout(|| self.definition.instantiate())?;
                if origin.is_fresh() {
                    self.definition
                        .fields()
                        .push_bindings(any_mut(instance.as_mut()), &self.bindings);
                }
                Ok((instance, lease_for(origin, Lease::Pooled)))
            }
            ComponentKind::Stateless(Pooling::Shared) => {
                let slot = self.definition.shared_slot().ok_or_else(|| {
                    RuntimeError::component(self.definition.name(), "missing shared slot")
                })?;
                let (instance, origin) = slot.checkout(&self.definition, &self.bindings)?;
                Ok((instance, lease_for(origin, Lease::Shared)))
            }
            ComponentKind::Stateful => Err(RuntimeError::component(
                self.definition.name(),
                "stateful components are not pooled",
            )),
        }
    }

    pub(crate) fn release_stateless(
        &self,
        instance: Box<dyn Component>,
        lease: &Lease,
    ) -> RuntimeResult<()> {
        match lease {
            Lease::Pooled => match &self.pool {
                Some(pool) => pool.checkin(instance),
                None => Ok(()),
            },
            Lease::Shared => match self.definition.shared_slot() {
                Some(slot) => slot.checkin(&self.definition, instance),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

fn lease_for(origin: Checkout, pooled: Lease) -> Lease {
    if origin.is_pooled() {
        pooled
    } else {
        Lease::Transient
    }
}

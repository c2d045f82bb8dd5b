//! Page Module for Zenith Runtime
//!
//! A page owns its root instance and every stateful instance below it,
//! keyed by element id. Nothing else holds on to a stateful instance between
//! exchanges.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::component::{any_mut, Component};
use crate::definition::ComponentDefinition;
use crate::element_id::ElementIdPath;
use crate::error::{RuntimeError, RuntimeResult};

struct StatefulEntry {
    fingerprint: String,
    instance: Box<dyn Component>,
}

pub struct Page {
    id: u64,
    definition: Arc<ComponentDefinition>,
    root: Option<Box<dyn Component>>,
    stateful: HashMap<ElementIdPath, StatefulEntry>,
    generation: u64,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("stateful", &self.stateful.len())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Page {
    pub fn new(id: u64, definition: Arc<ComponentDefinition>, generation: u64) -> Self {
        let root = definition.instantiate();
        debug!(page = id, name = %definition.name(), "created page");
        Page {
            id,
            definition,
            root: Some(root),
            stateful: HashMap::new(),
            generation,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &Arc<ComponentDefinition> {
        &self.definition
    }

    /// Application generation the page was created under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stateful_count(&self) -> usize {
        self.stateful.len()
    }

    pub fn has_stateful(&self, path: &ElementIdPath) -> bool {
        self.stateful.contains_key(path)
    }

    pub fn stateful_paths(&self) -> Vec<ElementIdPath> {
        let mut paths: Vec<ElementIdPath> = self.stateful.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Runs `f` against the root instance when it is of type `T`.
    pub fn with_root<T: Component, R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let root = self.root.as_mut()?;
        any_mut(root.as_mut()).downcast_mut::<T>().map(f)
    }

    pub fn with_stateful<T: Component, R>(
        &mut self,
        path: &ElementIdPath,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let entry = self.stateful.get_mut(path)?;
        any_mut(entry.instance.as_mut()).downcast_mut::<T>().map(f)
    }

    /// Points the page at the current definition of its root after a class
    /// reload that left the root itself unchanged. Templates below it are
    /// rebuilt from the current classes on the next walk.
    pub(crate) fn rebind(&mut self, definition: Arc<ComponentDefinition>, generation: u64) {
        info!(page = self.id, from = self.generation, to = generation, "rebound page to reloaded classes");
        self.definition = definition;
        self.generation = generation;
    }

    /// Drops stateful instances whose element id was not reached by the last
    /// full render, such as rows of a list that shrank.
    pub(crate) fn retain_stateful(&mut self, visited: &HashSet<ElementIdPath>) {
        let before = self.stateful.len();
        self.stateful.retain(|path, _| visited.contains(path));
        let dropped = before - self.stateful.len();
        if dropped > 0 {
            debug!(page = self.id, dropped, "swept unvisited stateful instances");
        }
    }

    pub(crate) fn take_root(&mut self) -> RuntimeResult<Box<dyn Component>> {
        self.root
            .take()
            .ok_or_else(|| RuntimeError::component(self.definition.name(), "page root is in use"))
    }

    pub(crate) fn restore_root(&mut self, root: Box<dyn Component>) {
        self.root = Some(root);
    }

    /// Moves a stateful instance out for the duration of a walk. An instance
    /// built from an older definition comes back as `Err` so the caller can
    /// decide whether to replace it.
    pub(crate) fn take_stateful(
        &mut self,
        path: &ElementIdPath,
        definition: &ComponentDefinition,
    ) -> Option<Result<Box<dyn Component>, Box<dyn Component>>> {
        let entry = self.stateful.remove(path)?;
        if entry.fingerprint == definition.fingerprint() {
            Some(Ok(entry.instance))
        } else {
            Some(Err(entry.instance))
        }
    }

    pub(crate) fn insert_stateful(
        &mut self,
        path: ElementIdPath,
        definition: &ComponentDefinition,
        instance: Box<dyn Component>,
    ) {
        self.stateful.insert(
            path,
            StatefulEntry {
                fingerprint: definition.fingerprint().to_string(),
                instance,
            },
        );
    }
}

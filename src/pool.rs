//! Instance pools for stateless components.

use std::sync::Mutex;

use serde::Serialize;
use tracing::trace;

use crate::component::Component;
use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Instances constructed for the pool. Never exceeds the capacity.
    pub created: usize,
    /// Pool instances checked out and not yet returned.
    pub outstanding: usize,
    pub peak_outstanding: usize,
    /// One-off instances handed out while every pool instance was busy.
    pub transient: usize,
}

/// Where a checked-out instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    Recycled,
    Created,
    /// Built because the pool was exhausted. It is not owned by the pool and
    /// is dropped by the borrower instead of checked in.
    Transient,
}

impl Checkout {
    /// True when the instance has never been used before.
    pub fn is_fresh(self) -> bool {
        !matches!(self, Checkout::Recycled)
    }

    pub fn is_pooled(self) -> bool {
        !matches!(self, Checkout::Transient)
    }
}

struct PoolState {
    idle: Vec<Box<dyn Component>>,
    stats: PoolStats,
}

/// Fixed-size recycle pool. At most `capacity` pool instances exist, idle
/// or checked out. Checkout never blocks: demand past the capacity gets a
/// transient instance.
pub struct InstancePool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl InstancePool {
    pub fn new(capacity: usize) -> Self {
        InstancePool {
            capacity,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                stats: PoolStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns an idle instance, a new pool instance while the pool is below
    /// capacity, or a transient one from `create`.
    pub fn checkout<F>(&self, create: F) -> RuntimeResult<(Box<dyn Component>, Checkout)>
    where
        F: FnOnce() -> Box<dyn Component>,
    {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RuntimeError::Poisoned("instance pool"))?;
        let (recycled, origin) = match state.idle.pop() {
            Some(instance) => (Some(instance), Checkout::Recycled),
            None if state.stats.outstanding < self.capacity => {
                state.stats.created += 1;
                trace!(created = state.stats.created, "pool grew");
                (None, Checkout::Created)
            }
            None => {
                state.stats.transient += 1;
                trace!(capacity = self.capacity, "pool exhausted, lending a transient instance");
                (None, Checkout::Transient)
            }
        };
        if origin.is_pooled() {
            state.stats.outstanding += 1;
            state.stats.peak_outstanding = state.stats.peak_outstanding.max(state.stats.outstanding);
        }
        drop(state);

        Ok(match recycled {
            Some(instance) => (instance, origin),
            None => (create(), origin),
        })
    }

    /// Returns a pool instance. Transient instances are never checked in.
    pub fn checkin(&self, instance: Box<dyn Component>) -> RuntimeResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RuntimeError::Poisoned("instance pool"))?;
        if state.stats.outstanding == 0 {
            return Err(RuntimeError::component(
                "InstancePool",
                "checkin without a matching checkout",
            ));
        }
        state.stats.outstanding -= 1;
        state.idle.push(instance);
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        self.state
            .lock()
            .map(|state| state.stats)
            .unwrap_or_default()
    }

    pub fn idle(&self) -> usize {
        self.state.lock().map(|state| state.idle.len()).unwrap_or(0)
    }
}

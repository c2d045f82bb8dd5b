//! Session Module for Zenith Runtime
//!
//! The page cache of one client. Exchanges on the same session are
//! serialized by the session lock; exchanges on different sessions run in
//! parallel.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use tracing::debug;

use crate::application::Application;
use crate::error::{RuntimeError, RuntimeResult};
use crate::page::Page;

pub struct SessionState {
    pages: LruCache<u64, Page>,
    next_page_id: u64,
}

impl SessionState {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        SessionState {
            pages: LruCache::new(capacity),
            next_page_id: 1,
        }
    }

    /// Creates a page rooted at the named component and caches it, evicting
    /// the least recently used page when full.
    pub fn create_page(&mut self, app: &Application, name: &str) -> RuntimeResult<u64> {
        let definition = app.definition(name)?;
        let id = self.next_page_id;
        self.next_page_id += 1;
        let page = Page::new(id, definition, app.generation());
        if let Some((evicted, _)) = self.pages.push(id, page) {
            if evicted != id {
                debug!(page = evicted, "evicted page from session cache");
            }
        }
        Ok(id)
    }

    pub fn page_mut(&mut self, id: u64) -> RuntimeResult<&mut Page> {
        self.pages.get_mut(&id).ok_or(RuntimeError::PageExpired(id))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pages.contains(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<Page> {
        self.pages.pop(&id)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

pub struct Session {
    id: String,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    pub fn new(id: &str, page_cache_size: usize) -> Self {
        Session {
            id: id.to_string(),
            state: Mutex::new(SessionState::new(page_cache_size)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lock(&self) -> RuntimeResult<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| RuntimeError::Poisoned("session state"))
    }
}

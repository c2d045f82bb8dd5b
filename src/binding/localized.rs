use std::collections::HashMap;
use std::sync::Mutex;

use super::Scope;

/// Per-binding cache of resolved strings, keyed by the identity of the
/// resource manager that produced them. Switching locale switches managers,
/// so a stale entry is never served.
#[derive(Debug, Default)]
pub struct LocalizedMemo {
    entries: Mutex<HashMap<u64, String>>,
}

impl LocalizedMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The string for `key` in the table named after the declaring component.
    pub fn resolve(&self, key: &str, default: &str, scope: &Scope<'_>) -> String {
        let env = scope.env();
        let resources = env.resources();
        let identity = resources.identity();

        if let Some(hit) = self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&identity).cloned())
        {
            return hit;
        }

        let text = resources
            .localized_string(scope.context_name(), key)
            .unwrap_or_else(|| default.to_string());
        let text = if env.app().config().localization_markers {
            format!("<!--l10n:{}-->{}<!--/l10n-->", key, text)
        } else {
            text
        };

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(identity, text.clone());
        }
        text
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Localization Module for Zenith Runtime
//!
//! String tables per locale. A table is named after the component whose
//! template declares the localized binding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

static RESOURCE_MANAGER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates an identity for a new resource manager.
pub fn next_resource_identity() -> u64 {
    RESOURCE_MANAGER_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lookup for one locale. Localized bindings memoize by `identity`, so a
/// manager must return stable strings for as long as it lives.
pub trait ResourceManager: Send + Sync {
    fn identity(&self) -> u64;

    fn locale(&self) -> &str;

    fn localized_string(&self, table: &str, key: &str) -> Option<String>;
}

/// Hands out the resource manager for a locale.
pub trait Localization: Send + Sync {
    fn resource_manager(&self, locale: &str) -> Arc<dyn ResourceManager>;
}

type Tables = HashMap<String, HashMap<String, String>>;

/// In-memory tables: `locale -> table -> key -> string`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringTables {
    locales: HashMap<String, Tables>,
    #[serde(skip)]
    managers: Mutex<HashMap<String, Arc<LocaleStrings>>>,
}

impl StringTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| RuntimeError::Config(format!("invalid string tables: {}", e)))
    }

    pub fn insert(&mut self, locale: &str, table: &str, key: &str, text: &str) {
        self.locales
            .entry(locale.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), text.to_string());
        if let Ok(mut managers) = self.managers.lock() {
            managers.clear();
        }
    }

    /// Tables for `locale`, falling back from `fr_CA` to `fr`.
    fn tables_for(&self, locale: &str) -> Tables {
        let mut merged = Tables::new();
        let language = locale.split(['_', '-']).next().unwrap_or(locale);
        for candidate in [language, locale] {
            if let Some(tables) = self.locales.get(candidate) {
                for (table, strings) in tables {
                    merged
                        .entry(table.clone())
                        .or_default()
                        .extend(strings.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        merged
    }
}

impl Localization for StringTables {
    fn resource_manager(&self, locale: &str) -> Arc<dyn ResourceManager> {
        let build = || {
            Arc::new(LocaleStrings {
                identity: next_resource_identity(),
                locale: locale.to_string(),
                tables: self.tables_for(locale),
            })
        };
        let manager: Arc<LocaleStrings> = match self.managers.lock() {
            Ok(mut managers) => managers.entry(locale.to_string()).or_insert_with(build).clone(),
            Err(_) => build(),
        };
        manager
    }
}

#[derive(Debug)]
pub struct LocaleStrings {
    identity: u64,
    locale: String,
    tables: Tables,
}

impl ResourceManager for LocaleStrings {
    fn identity(&self) -> u64 {
        self.identity
    }

    fn locale(&self) -> &str {
        &self.locale
    }

    fn localized_string(&self, table: &str, key: &str) -> Option<String> {
        self.tables.get(table).and_then(|t| t.get(key)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLES: &str = r#"{
        "en": {"Main": {"greeting": "Hello"}},
        "fr": {"Main": {"greeting": "Bonjour", "bye": "Au revoir"}},
        "fr_CA": {"Main": {"greeting": "Allo"}}
    }"#;

    #[test]
    fn test_lookup_with_fallback() {
        let tables = StringTables::from_json(TABLES).unwrap();
        let fr_ca = tables.resource_manager("fr_CA");
        assert_eq!(fr_ca.localized_string("Main", "greeting").as_deref(), Some("Allo"));
        assert_eq!(fr_ca.localized_string("Main", "bye").as_deref(), Some("Au revoir"));
        assert_eq!(fr_ca.localized_string("Other", "bye"), None);
    }

    #[test]
    fn test_identity_is_stable_per_locale() {
        let tables = StringTables::from_json(TABLES).unwrap();
        let a = tables.resource_manager("en");
        let b = tables.resource_manager("en");
        let c = tables.resource_manager("fr");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
        assert_eq!(c.locale(), "fr");
    }
}

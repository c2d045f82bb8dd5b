//! Config Module for Zenith Runtime
//!
//! Runtime switches, loaded from JSON or `ZENITH_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

fn default_local_pool_capacity() -> usize {
    4
}

fn default_shared_overflow_capacity() -> usize {
    8
}

fn default_page_cache_size() -> usize {
    10
}

fn default_main_page() -> String {
    "Main".to_string()
}

fn default_locale() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Raise validation failures instead of recording them.
    #[serde(default)]
    pub strict_validation: bool,
    /// Enables stale page replacement after `reload_class`.
    #[serde(default)]
    pub debug: bool,
    /// Records a textual cursor trace per phase walk.
    #[serde(default)]
    pub trace_element_ids: bool,
    #[serde(default)]
    pub localization_markers: bool,
    #[serde(default = "default_local_pool_capacity")]
    pub local_pool_capacity: usize,
    #[serde(default = "default_shared_overflow_capacity")]
    pub shared_overflow_capacity: usize,
    #[serde(default = "default_page_cache_size")]
    pub page_cache_size: usize,
    #[serde(default = "default_main_page")]
    pub main_page: String,
    #[serde(default = "default_locale")]
    pub default_locale: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            strict_validation: false,
            debug: false,
            trace_element_ids: false,
            localization_markers: false,
            local_pool_capacity: default_local_pool_capacity(),
            shared_overflow_capacity: default_shared_overflow_capacity(),
            page_cache_size: default_page_cache_size(),
            main_page: default_main_page(),
            default_locale: default_locale(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(text).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `ZENITH_STRICT_VALIDATION`, `ZENITH_DEBUG`,
    /// `ZENITH_PAGE_CACHE_SIZE` and friends.
    pub fn from_env() -> RuntimeResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> RuntimeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RuntimeConfig::default();
        let flag = |name: &str, target: &mut bool| -> RuntimeResult<()> {
            if let Some(raw) = lookup(name) {
                *target = parse_flag(name, &raw)?;
            }
            Ok(())
        };
        flag("ZENITH_STRICT_VALIDATION", &mut config.strict_validation)?;
        flag("ZENITH_DEBUG", &mut config.debug)?;
        flag("ZENITH_TRACE_ELEMENT_IDS", &mut config.trace_element_ids)?;
        flag("ZENITH_LOCALIZATION_MARKERS", &mut config.localization_markers)?;

        let size = |name: &str, target: &mut usize| -> RuntimeResult<()> {
            if let Some(raw) = lookup(name) {
                *target = raw
                    .trim()
                    .parse()
                    .map_err(|_| RuntimeError::Config(format!("{} must be a number, got '{}'", name, raw)))?;
            }
            Ok(())
        };
        size("ZENITH_LOCAL_POOL_CAPACITY", &mut config.local_pool_capacity)?;
        size("ZENITH_SHARED_OVERFLOW_CAPACITY", &mut config.shared_overflow_capacity)?;
        size("ZENITH_PAGE_CACHE_SIZE", &mut config.page_cache_size)?;

        if let Some(main_page) = lookup("ZENITH_MAIN_PAGE") {
            config.main_page = main_page;
        }
        if let Some(locale) = lookup("ZENITH_DEFAULT_LOCALE") {
            config.default_locale = locale;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.page_cache_size == 0 {
            return Err(RuntimeError::Config("pageCacheSize must be at least 1".into()));
        }
        if self.local_pool_capacity == 0 || self.shared_overflow_capacity == 0 {
            return Err(RuntimeError::Config("pool capacities must be at least 1".into()));
        }
        if self.main_page.is_empty() {
            return Err(RuntimeError::Config("mainPage must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, raw: &str) -> RuntimeResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(RuntimeError::Config(format!("{} must be a boolean, got '{}'", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_json_defaults() {
        let config = RuntimeConfig::from_json(r#"{"debug": true, "pageCacheSize": 3}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.page_cache_size, 3);
        assert_eq!(config.local_pool_capacity, 4);
        assert_eq!(config.main_page, "Main");
        assert_eq!(config, RuntimeConfig { debug: true, page_cache_size: 3, ..Default::default() });
    }

    #[test]
    fn test_rejects_zero_cache() {
        assert!(matches!(
            RuntimeConfig::from_json(r#"{"pageCacheSize": 0}"#),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn test_env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ZENITH_STRICT_VALIDATION", "yes"),
            ("ZENITH_PAGE_CACHE_SIZE", "2"),
            ("ZENITH_MAIN_PAGE", "Home"),
        ]
        .into_iter()
        .collect();
        let config = RuntimeConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert!(config.strict_validation);
        assert_eq!(config.page_cache_size, 2);
        assert_eq!(config.main_page, "Home");

        let bad = RuntimeConfig::from_lookup(|name| {
            (name == "ZENITH_DEBUG").then(|| "maybe".to_string())
        });
        assert!(bad.is_err());
    }
}

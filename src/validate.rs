use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

use crate::error::{RuntimeError, RuntimeResult};

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const VAL_MISSING_GETTER: &str = "Z-VAL-BINDING-001";
pub const VAL_MISSING_SETTER: &str = "Z-VAL-BINDING-002";
pub const VAL_MISSING_ACCESSOR: &str = "Z-VAL-BINDING-003";
pub const VAL_UNSUPPORTED_BINDING: &str = "Z-VAL-BINDING-004";
pub const VAL_REQUIRED_BINDING: &str = "Z-VAL-BINDING-005";
pub const VAL_UNKNOWN_CLASS: &str = "Z-VAL-BINDING-006";
pub const VAL_MISSING_CONTENT: &str = "Z-VAL-CONTENT-001";
pub const VAL_EXPRESSION_KEY: &str = "Z-VAL-EXPR-001";

fn get_guarantee(code: &str) -> &'static str {
    match code {
        VAL_MISSING_GETTER => "Every bound key can be read from the component that declares the binding.",
        VAL_MISSING_SETTER => "Every binding written by a component targets a settable key.",
        VAL_MISSING_ACCESSOR => "Every bound key exists on the component that declares the binding.",
        VAL_UNSUPPORTED_BINDING => "Components only receive bindings they declare.",
        VAL_REQUIRED_BINDING => "Required bindings are always supplied.",
        VAL_UNKNOWN_CLASS => "Class accessors name a registered class.",
        VAL_MISSING_CONTENT => "Components that include content are given content.",
        VAL_EXPRESSION_KEY => "Identifiers in expressions resolve on the declaring component.",
        _ => "Unknown guarantee.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Which accessors a binding needs on its context object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Get,
    Set,
    /// Read or written depending on use; only the key itself must exist.
    Either,
    Both,
}

impl Direction {
    pub fn needs_get(self) -> bool {
        matches!(self, Direction::Get | Direction::Both)
    }

    pub fn needs_set(self) -> bool {
        matches!(self, Direction::Set | Direction::Both)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION RECORD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    /// Definition whose template holds the offending binding.
    pub component: String,
    pub binding: Option<String>,
}

impl ValidationRecord {
    pub fn new(code: &str, message: &str, component: &str, binding: Option<&str>) -> Self {
        ValidationRecord {
            code: code.to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            component: component.to_string(),
            binding: binding.map(str::to_string),
        }
    }
}

impl std::fmt::Display for ValidationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] <{}> {}", self.code, self.component, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects non-fatal validation records, or raises the first one in strict
/// mode.
#[derive(Debug, Default)]
pub struct ValidationContext {
    strict: bool,
    records: Mutex<Vec<ValidationRecord>>,
}

impl ValidationContext {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn report(&self, record: ValidationRecord) -> RuntimeResult<()> {
        if self.strict {
            return Err(RuntimeError::Validation(record));
        }
        warn!(code = %record.code, component = %record.component, "{}", record.message);
        let mut records = self
            .records
            .lock()
            .map_err(|_| RuntimeError::Poisoned("validation records"))?;
        if !records.contains(&record) {
            records.push(record);
        }
        Ok(())
    }

    pub fn records(&self) -> Vec<ValidationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_for(&self, component: &str) -> Vec<ValidationRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.component == component)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_accumulates_once() {
        let ctx = ValidationContext::new(false);
        let record = ValidationRecord::new(VAL_MISSING_GETTER, "no getter 'x'", "Page", Some("value"));
        ctx.report(record.clone()).unwrap();
        ctx.report(record).unwrap();
        let records = ctx.records_for("Page");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].guarantee, get_guarantee(VAL_MISSING_GETTER));
    }

    #[test]
    fn test_strict_raises() {
        let ctx = ValidationContext::new(true);
        let record = ValidationRecord::new(VAL_REQUIRED_BINDING, "missing 'list'", "Page", None);
        assert!(matches!(ctx.report(record), Err(RuntimeError::Validation(_))));
        assert!(ctx.records().is_empty());
    }

    #[test]
    fn test_direction() {
        assert!(Direction::Both.needs_get() && Direction::Both.needs_set());
        assert!(!Direction::Either.needs_get() && !Direction::Either.needs_set());
        let parsed: Direction = serde_json::from_str("\"set\"").unwrap();
        assert_eq!(parsed, Direction::Set);
    }
}

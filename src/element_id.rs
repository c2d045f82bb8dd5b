//! Element Id Module for Zenith Runtime
//!
//! Every node visited by a tree walk receives an `ElementIdPath`: the
//! sequence of sibling counters from the root down to the node. The path is
//! the only correlation key sent to the client, so two walks over the same
//! tree shape must generate byte-identical sequences.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};

lazy_static! {
    static ref WIRE_FORMAT: Regex = Regex::new(r"^(0|[1-9][0-9]{0,8})(\.(0|[1-9][0-9]{0,8}))*$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// ELEMENT ID PATH
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementIdPath(Arc<[u32]>);

impl ElementIdPath {
    /// The empty path: the page root.
    pub fn root() -> Self {
        ElementIdPath(Arc::from(Vec::new()))
    }

    fn from_levels(levels: &[u32]) -> Self {
        ElementIdPath(Arc::from(levels))
    }

    pub fn levels(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `other` lies in the subtree rooted at `self` (or is `self`).
    pub fn is_prefix_of(&self, other: &ElementIdPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    pub fn parent(&self) -> Option<ElementIdPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self::from_levels(&self.0[..self.0.len() - 1]))
        }
    }
}

impl fmt::Display for ElementIdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, level) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", level)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ElementIdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementIdPath({})", self)
    }
}

impl FromStr for ElementIdPath {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(ElementIdPath::root());
        }
        if !WIRE_FORMAT.is_match(s) {
            return Err(RuntimeError::InvalidElementId(s.to_string()));
        }
        let levels = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| RuntimeError::InvalidElementId(s.to_string()))
            })
            .collect::<RuntimeResult<Vec<u32>>>()?;
        Ok(ElementIdPath(Arc::from(levels)))
    }
}

impl Serialize for ElementIdPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ElementIdPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CURSORS
// ═══════════════════════════════════════════════════════════════════════════════

/// The mutable cursor one exchange advances while walking a tree.
pub trait ElementIdCursor: Send {
    /// Advances one sibling step at the current depth and returns the new path.
    fn next_path(&mut self) -> ElementIdPath {
        self.increment(1);
        self.current_path()
    }

    fn increment(&mut self, n: u32);

    fn push_level(&mut self);

    /// Leaves one nesting level. Popping the root level is an error.
    fn pop_level(&mut self) -> RuntimeResult<()>;

    fn current_path(&self) -> ElementIdPath;

    /// Nesting depth below the root level.
    fn depth(&self) -> usize;

    fn reset(&mut self);

    fn trace(&self) -> Option<&[String]> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ElementIdGenerator {
    levels: Vec<u32>,
}

impl Default for ElementIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementIdGenerator {
    pub fn new() -> Self {
        Self { levels: vec![0] }
    }
}

impl ElementIdCursor for ElementIdGenerator {
    fn increment(&mut self, n: u32) {
        if let Some(last) = self.levels.last_mut() {
            *last = last.saturating_add(n);
        }
    }

    fn push_level(&mut self) {
        self.levels.push(0);
    }

    fn pop_level(&mut self) -> RuntimeResult<()> {
        if self.levels.len() <= 1 {
            return Err(RuntimeError::UnbalancedNesting(format!(
                "pop_level past the root (current path '{}')",
                self.current_path()
            )));
        }
        self.levels.pop();
        Ok(())
    }

    fn current_path(&self) -> ElementIdPath {
        ElementIdPath::from_levels(&self.levels)
    }

    fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    fn reset(&mut self) {
        self.levels.clear();
        self.levels.push(0);
    }
}

/// Cursor for render-suppressed passes: every node sees the root path, but
/// nesting is still balance-checked.
#[derive(Debug, Default, Clone)]
pub struct NoOpCursor {
    depth: usize,
}

impl NoOpCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ElementIdCursor for NoOpCursor {
    fn increment(&mut self, _n: u32) {}

    fn push_level(&mut self) {
        self.depth += 1;
    }

    fn pop_level(&mut self) -> RuntimeResult<()> {
        if self.depth == 0 {
            return Err(RuntimeError::UnbalancedNesting(
                "pop_level past the root of a suppressed pass".to_string(),
            ));
        }
        self.depth -= 1;
        Ok(())
    }

    fn current_path(&self) -> ElementIdPath {
        ElementIdPath::root()
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn reset(&mut self) {
        self.depth = 0;
    }
}

/// Records one line per cursor operation, for diagnosing id mismatches
/// between phases.
#[derive(Debug, Default, Clone)]
pub struct TracingCursor {
    inner: ElementIdGenerator,
    log: Vec<String>,
}

impl TracingCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_trace(self) -> Vec<String> {
        self.log
    }
}

impl ElementIdCursor for TracingCursor {
    fn increment(&mut self, n: u32) {
        self.inner.increment(n);
        self.log
            .push(format!("increment({}) -> {}", n, self.inner.current_path()));
    }

    fn push_level(&mut self) {
        self.inner.push_level();
        self.log
            .push(format!("push_level -> {}", self.inner.current_path()));
    }

    fn pop_level(&mut self) -> RuntimeResult<()> {
        let result = self.inner.pop_level();
        match &result {
            Ok(()) => self
                .log
                .push(format!("pop_level -> {}", self.inner.current_path())),
            Err(_) => self.log.push("pop_level -> UNBALANCED".to_string()),
        }
        result
    }

    fn current_path(&self) -> ElementIdPath {
        self.inner.current_path()
    }

    fn depth(&self) -> usize {
        self.inner.depth()
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.log.push("reset".to_string());
    }

    fn trace(&self) -> Option<&[String]> {
        Some(&self.log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(cursor: &mut dyn ElementIdCursor) -> Vec<String> {
        // Two siblings, the first with two children and one grandchild.
        let mut seen = Vec::new();
        seen.push(cursor.next_path().to_string());
        cursor.push_level();
        seen.push(cursor.next_path().to_string());
        cursor.push_level();
        seen.push(cursor.next_path().to_string());
        cursor.pop_level().unwrap();
        seen.push(cursor.next_path().to_string());
        cursor.pop_level().unwrap();
        seen.push(cursor.next_path().to_string());
        seen
    }

    #[test]
    fn test_generator_sequence() {
        let mut cursor = ElementIdGenerator::new();
        assert_eq!(walk(&mut cursor), vec!["1", "1.1", "1.1.1", "1.2", "2"]);
        assert_eq!(cursor.depth(), 0);
    }

    #[test]
    fn test_repeated_walks_are_identical() {
        let mut cursor = ElementIdGenerator::new();
        let first = walk(&mut cursor);
        cursor.reset();
        let second = walk(&mut cursor);
        cursor.reset();
        let third = walk(&mut cursor);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn test_pop_past_root_is_error() {
        let mut cursor = ElementIdGenerator::new();
        cursor.push_level();
        assert!(cursor.pop_level().is_ok());
        assert!(matches!(
            cursor.pop_level(),
            Err(RuntimeError::UnbalancedNesting(_))
        ));
    }

    #[test]
    fn test_current_path_is_idempotent() {
        let mut cursor = ElementIdGenerator::new();
        cursor.increment(3);
        assert_eq!(cursor.current_path(), cursor.current_path());
        assert_eq!(cursor.current_path().to_string(), "3");
    }

    #[test]
    fn test_wire_round_trip() {
        let path: ElementIdPath = "1.12.3".parse().unwrap();
        assert_eq!(path.levels(), &[1, 12, 3]);
        assert_eq!(path.to_string(), "1.12.3");
        assert!("1..2".parse::<ElementIdPath>().is_err());
        assert!("01.2".parse::<ElementIdPath>().is_err());
        assert!("a.b".parse::<ElementIdPath>().is_err());
        assert!("".parse::<ElementIdPath>().unwrap().is_root());

        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"1.12.3\"");
        let back: ElementIdPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn test_prefix() {
        let a: ElementIdPath = "1.2".parse().unwrap();
        let b: ElementIdPath = "1.2.5".parse().unwrap();
        let c: ElementIdPath = "1.3".parse().unwrap();
        assert!(a.is_prefix_of(&b));
        assert!(a.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&c));
        assert!(!b.is_prefix_of(&a));
        assert!(ElementIdPath::root().is_prefix_of(&c));
        assert_eq!(b.parent(), Some(a));
    }

    #[test]
    fn test_noop_cursor_balances() {
        let mut cursor = NoOpCursor::new();
        assert!(cursor.next_path().is_root());
        cursor.push_level();
        assert_eq!(cursor.depth(), 1);
        cursor.pop_level().unwrap();
        assert!(cursor.pop_level().is_err());
    }

    #[test]
    fn test_tracing_cursor_records() {
        let mut cursor = TracingCursor::new();
        let ids = walk(&mut cursor);
        assert_eq!(ids, vec!["1", "1.1", "1.1.1", "1.2", "2"]);
        let trace = cursor.trace().unwrap();
        assert_eq!(trace[0], "increment(1) -> 1");
        assert_eq!(trace[1], "push_level -> 1.0");
        assert_eq!(trace.len(), 9);
    }
}

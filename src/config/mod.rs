//! Config Value Store
//!
//! `ConfigTree` is the resolved configuration of an experiment: an
//! insertion-ordered nested mapping restricted to JSON kinds (numbers,
//! strings, booleans, null, sequences and nested mappings).
//!
//! ## Layering
//!
//! ```text
//! ConfigScope ─┐
//! ConfigDict  ─┼─> SourceRegistry::resolve ─> ConfigTree ─> Arc (frozen per run)
//! FileSource  ─┘         ▲
//!                        └── named configs + overrides (highest precedence)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use capstan::config::ConfigTree;
//!
//! let mut config = ConfigTree::new();
//! config.set("optimizer.lr", 0.01);
//! config.set("optimizer.name", "adam");
//!
//! assert_eq!(config.get("optimizer.lr"), Some(&serde_json::json!(0.01)));
//! assert!(config.subtree("optimizer").is_some());
//! ```

mod file;
mod merge;
mod scope;
mod source;

pub use file::{FileFormat, FileSource};
pub use merge::{MergePolicy, MergeReport};
pub use scope::{ConfigScope, ScopeContext};
pub use source::{ConfigDict, ConfigSource, ResolvedConfig, SourceRegistry};

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered nested mapping holding configuration values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree {
    entries: Map<String, Value>,
}

impl ConfigTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigType` if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            other => Err(Error::ConfigType {
                path: String::new(),
                reason: format!("expected a mapping at the root, found {}", kind_name(&other)),
            }),
        }
    }

    /// Wrap an existing JSON map.
    #[must_use]
    pub const fn from_map(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// Look up a value by dotted path (`"optimizer.lr"`).
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.entries.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a value by dotted path and deserialize it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigType` if the path is missing or the value does
    /// not deserialize into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.get(path).ok_or_else(|| Error::ConfigType {
            path: path.to_string(),
            reason: "no value at this path".to_string(),
        })?;
        T::deserialize(value).map_err(|e| Error::ConfigType {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Check whether a dotted path is present.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a value at a dotted path.
    ///
    /// Intermediate mappings are created as needed; a non-mapping value on the
    /// way is replaced by a mapping.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.entries;
        for segment in segments {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), value);
    }

    /// Mapping stored at a dotted path. The empty path is the root.
    #[must_use]
    pub fn subtree(&self, path: &str) -> Option<&Map<String, Value>> {
        if path.is_empty() {
            return Some(&self.entries);
        }
        self.get(path)?.as_object()
    }

    /// Deep-merge `other` into `self`; `other` wins at every leaf.
    pub fn merge(&mut self, other: &Self) -> MergeReport {
        let mut report = MergeReport::default();
        // Permissive merging never fails.
        let _ = merge::deep_merge(
            &mut self.entries,
            &other.entries,
            MergePolicy::Permissive,
            "",
            &mut report,
        );
        report
    }

    /// Deep-merge under an explicit policy.
    ///
    /// # Errors
    ///
    /// Under `MergePolicy::Strict`, returns the dotted path of the first
    /// mapping/non-mapping collision. `self` is left untouched on error.
    pub fn merge_with_policy(
        &mut self,
        other: &Self,
        policy: MergePolicy,
    ) -> std::result::Result<MergeReport, String> {
        let mut report = MergeReport::default();
        let mut entries = self.entries.clone();
        merge::deep_merge(&mut entries, &other.entries, policy, "", &mut report)?;
        self.entries = entries;
        Ok(report)
    }

    /// Return a new tree with `other` merged over `self`.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Nest this tree under a dotted prefix (`"a.b"` → `{a: {b: self}}`).
    #[must_use]
    pub fn nested_under(self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        let mut wrapped = Self::new();
        wrapped.set(prefix, Value::Object(self.entries));
        wrapped
    }

    /// Flatten into `(dotted path, leaf)` pairs.
    ///
    /// Sequences and empty mappings are leaves.
    #[must_use]
    pub fn leaves(&self) -> Vec<(String, &Value)> {
        let mut output = Vec::new();
        flatten(&self.entries, "", &mut output);
        output
    }

    /// Number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tree has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over top-level entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Borrow the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Convert into a JSON object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }
}

impl From<Map<String, Value>> for ConfigTree {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}

fn flatten<'a>(map: &'a Map<String, Value>, path: &str, output: &mut Vec<(String, &'a Value)>) {
    for (key, value) in map {
        let child = join_path(path, key);
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten(inner, &child, output),
            _ => output.push((child, value)),
        }
    }
}

pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

pub(crate) const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

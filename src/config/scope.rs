//! Declarative config scopes.
//!
//! A scope is a builder closure run against a recording [`ScopeContext`].
//! Every value it binds that serializes into the JSON kind set becomes a
//! config leaf; anything else is dropped.

use super::merge::{deep_merge, MergePolicy, MergeReport};
use super::{ConfigSource, ConfigTree};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

type ScopeBody = dyn Fn(&mut ScopeContext<'_>) -> anyhow::Result<()>;

/// Config source backed by a builder closure.
pub struct ConfigScope {
    name: String,
    prefix: String,
    body: Box<ScopeBody>,
}

impl ConfigScope {
    /// Create a scope whose bindings land at the config root.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ScopeContext<'_>) -> anyhow::Result<()> + 'static,
    {
        Self {
            name: name.into(),
            prefix: String::new(),
            body: Box::new(body),
        }
    }

    /// Nest the scope's bindings under a dotted prefix.
    #[must_use]
    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl std::fmt::Debug for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigScope")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ConfigSource for ConfigScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn produce(&self, preset: &ConfigTree, fixed: &ConfigTree) -> Result<ConfigTree> {
        let mut context = ScopeContext::new(preset, fixed);
        (self.body)(&mut context).map_err(|e| Error::ConfigResolution {
            source_name: self.name.clone(),
            reason: format!("{e:#}"),
        })?;
        if !context.dropped.is_empty() {
            tracing::debug!(
                scope = %self.name,
                dropped = ?context.dropped,
                "discarded bindings outside the config kind set"
            );
        }
        Ok(context.bindings)
    }
}

/// Recording environment handed to a scope body.
pub struct ScopeContext<'a> {
    preset: &'a ConfigTree,
    fixed: &'a ConfigTree,
    bindings: ConfigTree,
    dropped: Vec<String>,
}

impl<'a> ScopeContext<'a> {
    pub(crate) fn new(preset: &'a ConfigTree, fixed: &'a ConfigTree) -> Self {
        Self {
            preset,
            fixed,
            bindings: ConfigTree::new(),
            dropped: Vec::new(),
        }
    }

    /// Bind `name` (dotted paths nest) to `value`.
    ///
    /// Fixed values take precedence leaf by leaf: a fixed mapping is merged
    /// over a bound mapping, any other fixed value replaces the binding.
    /// Values that fail to serialize are discarded.
    pub fn set<T: Serialize>(&mut self, name: &str, value: T) -> &mut Self {
        let fixed: &'a ConfigTree = self.fixed;
        let bound = match (serde_json::to_value(value), fixed.get(name)) {
            (Ok(Value::Object(mut own)), Some(Value::Object(pinned))) => {
                let mut report = MergeReport::default();
                // Permissive merging never fails.
                let _ = deep_merge(&mut own, pinned, MergePolicy::Permissive, name, &mut report);
                Value::Object(own)
            }
            (_, Some(pinned)) => pinned.clone(),
            (Ok(value), None) => value,
            (Err(_), None) => {
                self.dropped.push(name.to_string());
                return self;
            }
        };
        self.bindings.set(name, bound);
        self
    }

    /// Read a value: own bindings, then fixed values, then earlier sources.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.fixed.get(name))
            .or_else(|| self.preset.get(name))
    }

    /// Read and deserialize a value visible to this scope.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigType` if the value is missing or has another type.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| Error::ConfigType {
            path: name.to_string(),
            reason: "not bound in this scope or any earlier source".to_string(),
        })?;
        T::deserialize(value).map_err(|e| Error::ConfigType {
            path: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Names bound so far that were discarded.
    #[must_use]
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct OpenHandle;

    impl Serialize for OpenHandle {
        fn serialize<S: serde::Serializer>(
            &self,
            _serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("handles are not config values"))
        }
    }

    fn produce(scope: &ConfigScope, fixed: serde_json::Value) -> ConfigTree {
        let fixed = ConfigTree::from_value(fixed).unwrap();
        scope.produce(&ConfigTree::new(), &fixed).unwrap()
    }

    #[test]
    fn test_scope_bindings_become_leaves() {
        let scope = ConfigScope::new("defaults", |cfg| {
            cfg.set("foo", 42).set("bar", "baz").set("nested.flag", true);
            Ok(())
        });

        let tree = produce(&scope, json!({}));

        assert_eq!(tree.get("foo"), Some(&json!(42)));
        assert_eq!(tree.get("bar"), Some(&json!("baz")));
        assert_eq!(tree.get("nested.flag"), Some(&json!(true)));
    }

    #[test]
    fn test_unserializable_binding_dropped() {
        let scope = ConfigScope::new("defaults", |cfg| {
            cfg.set("handle", OpenHandle);
            cfg.set("kept", vec![1, 2, 3]);
            assert_eq!(cfg.dropped(), ["handle".to_string()]);
            Ok(())
        });

        let tree = produce(&scope, json!({}));

        assert!(!tree.contains("handle"));
        assert_eq!(tree.get("kept"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_fixed_value_feeds_derived_binding() {
        let scope = ConfigScope::new("defaults", |cfg| {
            cfg.set("lr", 0.1);
            let lr: f64 = cfg.get_as("lr")?;
            cfg.set("steps", (1.0 / lr).round() as u64);
            Ok(())
        });

        let tree = produce(&scope, json!({"lr": 0.5}));

        assert_eq!(tree.get("lr"), Some(&json!(0.5)));
        assert_eq!(tree.get("steps"), Some(&json!(2)));
    }

    #[test]
    fn test_fixed_leaf_keeps_sibling_bindings() {
        let scope = ConfigScope::new("defaults", |cfg| {
            cfg.set("optimizer", json!({"lr": 0.1, "momentum": 0.9}));
            Ok(())
        });

        let tree = produce(&scope, json!({"optimizer": {"lr": 0.5}}));

        assert_eq!(tree.get("optimizer"), Some(&json!({"lr": 0.5, "momentum": 0.9})));
    }

    #[test]
    fn test_fixed_scalar_replaces_bound_mapping() {
        let scope = ConfigScope::new("defaults", |cfg| {
            cfg.set("schedule", json!({"kind": "cosine"}));
            Ok(())
        });

        let tree = produce(&scope, json!({"schedule": "constant"}));

        assert_eq!(tree.get("schedule"), Some(&json!("constant")));
    }

    #[test]
    fn test_scope_sees_earlier_sources() {
        let preset = ConfigTree::from_value(json!({"base": 3})).unwrap();
        let scope = ConfigScope::new("derived", |cfg| {
            let base: i64 = cfg.get_as("base")?;
            cfg.set("double", base * 2);
            Ok(())
        });

        let tree = scope.produce(&preset, &ConfigTree::new()).unwrap();

        assert_eq!(tree.get("double"), Some(&json!(6)));
        assert!(!tree.contains("base"));
    }

    #[test]
    fn test_scope_error_is_resolution_error() {
        let scope = ConfigScope::new("broken", |cfg| {
            let _: i64 = cfg.get_as("nowhere")?;
            Ok(())
        });

        let err = scope.produce(&ConfigTree::new(), &ConfigTree::new()).unwrap_err();

        assert!(matches!(
            err,
            Error::ConfigResolution { ref source_name, .. } if source_name == "broken"
        ));
    }
}

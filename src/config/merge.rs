//! Recursive deep merge with a change report.

use super::{join_path, kind_name};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How kind-incompatible collisions (mapping vs non-mapping) are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Last writer wins; the collision is logged and reported.
    #[default]
    Permissive,
    /// A mapping/non-mapping collision is a resolution error.
    Strict,
}

/// Dotted paths touched by one or more merges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Paths that did not exist before.
    pub added: Vec<String>,
    /// Paths whose value was replaced.
    pub modified: Vec<String>,
    /// Paths whose value changed kind (e.g. number -> mapping).
    pub kind_changed: Vec<String>,
}

impl MergeReport {
    /// Fold another report into this one.
    pub fn extend(&mut self, other: Self) {
        self.added.extend(other.added);
        self.modified.extend(other.modified);
        self.kind_changed.extend(other.kind_changed);
    }

    /// Check if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.kind_changed.is_empty()
    }
}

/// Merge `source` into `target`. Mappings merge key by key, everything else
/// is replaced.
pub(crate) fn deep_merge(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
    policy: MergePolicy,
    prefix: &str,
    report: &mut MergeReport,
) -> Result<(), String> {
    for (key, incoming) in source {
        let path = join_path(prefix, key);
        let Some(existing) = target.get_mut(key) else {
            report.added.push(path);
            target.insert(key.clone(), incoming.clone());
            continue;
        };

        if let (Value::Object(existing_map), Value::Object(incoming_map)) =
            (&mut *existing, incoming)
        {
            deep_merge(existing_map, incoming_map, policy, &path, report)?;
            continue;
        }

        // Null is a placeholder, not a kind: filling it in never collides.
        let nullish = existing.is_null() || incoming.is_null();
        if !nullish && existing.is_object() != incoming.is_object() {
            if policy == MergePolicy::Strict {
                return Err(format!(
                    "`{path}` is a {} but the source provides a {}",
                    kind_name(existing),
                    kind_name(incoming)
                ));
            }
            tracing::warn!(
                path = %path,
                from = kind_name(existing),
                to = kind_name(incoming),
                "config value changed kind; last writer wins"
            );
        }

        if is_kind_change(existing, incoming) {
            report.kind_changed.push(path.clone());
        }
        if existing != incoming {
            report.modified.push(path);
            *existing = incoming.clone();
        }
    }
    Ok(())
}

fn is_kind_change(old: &Value, new: &Value) -> bool {
    if old.is_null() || new.is_null() {
        return false;
    }
    std::mem::discriminant(old) != std::mem::discriminant(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_report_added_and_modified() {
        let mut target = map(json!({"a": 1, "b": {"c": 2}}));
        let source = map(json!({"a": 1, "b": {"c": 3, "d": 4}, "e": 5}));
        let mut report = MergeReport::default();

        deep_merge(&mut target, &source, MergePolicy::Permissive, "", &mut report).unwrap();

        assert_eq!(report.added, vec!["b.d", "e"]);
        assert_eq!(report.modified, vec!["b.c"]);
        assert!(report.kind_changed.is_empty());
    }

    #[test]
    fn test_permissive_scalar_over_mapping() {
        let mut target = map(json!({"bar": {"x": 1}}));
        let source = map(json!({"bar": 7}));
        let mut report = MergeReport::default();

        deep_merge(&mut target, &source, MergePolicy::Permissive, "", &mut report).unwrap();

        assert_eq!(target.get("bar"), Some(&json!(7)));
        assert_eq!(report.kind_changed, vec!["bar"]);
    }

    #[test]
    fn test_strict_rejects_mapping_collision() {
        let mut target = map(json!({"bar": 7}));
        let source = map(json!({"bar": {"x": 1}}));
        let mut report = MergeReport::default();

        let err = deep_merge(&mut target, &source, MergePolicy::Strict, "", &mut report)
            .unwrap_err();

        assert!(err.contains("`bar`"));
        assert_eq!(target.get("bar"), Some(&json!(7)));
    }

    #[test]
    fn test_strict_allows_scalar_kind_change() {
        let mut target = map(json!({"bar": 7}));
        let source = map(json!({"bar": "seven"}));
        let mut report = MergeReport::default();

        deep_merge(&mut target, &source, MergePolicy::Strict, "", &mut report).unwrap();

        assert_eq!(report.kind_changed, vec!["bar"]);
    }

    #[test]
    fn test_strict_fills_null_placeholder_with_mapping() {
        let mut target = map(json!({"dataset": null}));
        let source = map(json!({"dataset": {"path": "data/train.csv"}}));
        let mut report = MergeReport::default();

        deep_merge(&mut target, &source, MergePolicy::Strict, "", &mut report).unwrap();

        assert_eq!(target.get("dataset"), Some(&json!({"path": "data/train.csv"})));
        assert!(report.kind_changed.is_empty());
        assert_eq!(report.modified, vec!["dataset"]);
    }

    #[test]
    fn test_strict_clears_mapping_with_null() {
        let mut target = map(json!({"dataset": {"path": "data/train.csv"}}));
        let source = map(json!({"dataset": null}));
        let mut report = MergeReport::default();

        deep_merge(&mut target, &source, MergePolicy::Strict, "", &mut report).unwrap();

        assert_eq!(target.get("dataset"), Some(&Value::Null));
        assert!(report.kind_changed.is_empty());
    }

    #[test]
    fn test_null_is_not_a_kind_change() {
        let mut target = map(json!({"seed": null}));
        let source = map(json!({"seed": 42}));
        let mut report = MergeReport::default();

        deep_merge(&mut target, &source, MergePolicy::Permissive, "", &mut report).unwrap();

        assert!(report.kind_changed.is_empty());
        assert_eq!(report.modified, vec!["seed"]);
    }
}

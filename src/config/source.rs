//! Config Source Registry
//!
//! Sources are resolved in registration order; each produced fragment is
//! deep-merged over the accumulator, so the highest-index source defining a
//! leaf wins. Selected named configs and the run overrides are merged last.

use super::{ConfigTree, MergePolicy, MergeReport};
use crate::{Error, Result};
use serde_json::Value;

/// A unit that produces a configuration fragment.
pub trait ConfigSource {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Dotted path under which the fragment is nested (empty = root).
    fn prefix(&self) -> &str {
        ""
    }

    /// Produce this source's fragment.
    ///
    /// `preset` holds what earlier sources produced and `fixed` holds values
    /// that will override this source (named configs and run overrides), both
    /// already scoped to [`ConfigSource::prefix`].
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigResolution` if the fragment cannot be produced.
    fn produce(&self, preset: &ConfigTree, fixed: &ConfigTree) -> Result<ConfigTree>;
}

/// Static mapping source.
#[derive(Debug, Clone)]
pub struct ConfigDict {
    name: String,
    prefix: String,
    tree: ConfigTree,
}

impl ConfigDict {
    /// Create a source from a tree.
    #[must_use]
    pub fn new(name: impl Into<String>, tree: ConfigTree) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            tree,
        }
    }

    /// Create a source from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigResolution` if `value` is not an object.
    pub fn from_value(name: impl Into<String>, value: Value) -> Result<Self> {
        let name = name.into();
        let tree = ConfigTree::from_value(value).map_err(|e| Error::ConfigResolution {
            source_name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(name, tree))
    }

    /// Nest the fragment under a dotted prefix.
    #[must_use]
    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl ConfigSource for ConfigDict {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn produce(&self, _preset: &ConfigTree, _fixed: &ConfigTree) -> Result<ConfigTree> {
        Ok(self.tree.clone())
    }
}

/// Outcome of resolving a registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    /// Fully merged configuration.
    pub tree: ConfigTree,
    /// Every path added, modified or kind-changed along the way.
    pub report: MergeReport,
}

/// Ordered collection of config sources plus optional named configs.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Box<dyn ConfigSource>>,
    named: Vec<(String, Box<dyn ConfigSource>)>,
    policy: MergePolicy,
}

impl SourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a default source.
    pub fn add(&mut self, source: impl ConfigSource + 'static) {
        self.sources.push(Box::new(source));
    }

    /// Register a source that is only applied when selected by name.
    ///
    /// Registering a name twice replaces the earlier source.
    pub fn add_named(&mut self, name: impl Into<String>, source: impl ConfigSource + 'static) {
        let name = name.into();
        self.named.retain(|(existing, _)| existing != &name);
        self.named.push((name, Box::new(source)));
    }

    /// Set the collision policy.
    pub fn set_policy(&mut self, policy: MergePolicy) {
        self.policy = policy;
    }

    /// Current collision policy.
    #[must_use]
    pub const fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Number of default sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no default sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Names of the default sources in registration order.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Names of the registered named configs.
    #[must_use]
    pub fn named_config_names(&self) -> Vec<String> {
        self.named.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Resolve the default sources with `overrides` merged last.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigResolution` if any source fails.
    pub fn resolve(&self, overrides: &ConfigTree) -> Result<ResolvedConfig> {
        self.resolve_with(&[], overrides)
    }

    /// Resolve default sources, then the selected named configs (in the given
    /// order), then `overrides`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownNamedConfig` for an unregistered name and
    /// `Error::ConfigResolution` if any source fails.
    pub fn resolve_with(&self, named: &[String], overrides: &ConfigTree) -> Result<ResolvedConfig> {
        let selected = named
            .iter()
            .map(|name| {
                self.named
                    .iter()
                    .find(|(registered, _)| registered == name)
                    .map(|(_, source)| source.as_ref())
                    .ok_or_else(|| Error::UnknownNamedConfig(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        // Named configs see only the overrides as fixed, and become fixed
        // themselves for the default sources.
        let mut named_tree = ConfigTree::new();
        for source in &selected {
            let fragment = produce_scoped(*source, &named_tree, overrides)?;
            self.merge_into(
                &mut named_tree,
                &fragment,
                source.name(),
                &mut MergeReport::default(),
            )?;
        }
        let mut fixed = named_tree.clone();
        self.merge_into(&mut fixed, overrides, "overrides", &mut MergeReport::default())?;

        let mut resolved = ResolvedConfig::default();
        for source in &self.sources {
            let fragment = produce_scoped(source.as_ref(), &resolved.tree, &fixed)?;
            tracing::debug!(
                source = source.name(),
                keys = fragment.len(),
                "config source produced"
            );
            self.merge_into(&mut resolved.tree, &fragment, source.name(), &mut resolved.report)?;
        }
        self.merge_into(&mut resolved.tree, &named_tree, "named configs", &mut resolved.report)?;
        self.merge_into(&mut resolved.tree, overrides, "overrides", &mut resolved.report)?;

        Ok(resolved)
    }

    fn merge_into(
        &self,
        target: &mut ConfigTree,
        fragment: &ConfigTree,
        source_name: &str,
        report: &mut MergeReport,
    ) -> Result<()> {
        let step = target
            .merge_with_policy(fragment, self.policy)
            .map_err(|reason| Error::ConfigResolution {
                source_name: source_name.to_string(),
                reason,
            })?;
        report.extend(step);
        Ok(())
    }
}

/// Run a source against views scoped to its prefix and nest the result.
fn produce_scoped(
    source: &dyn ConfigSource,
    preset: &ConfigTree,
    fixed: &ConfigTree,
) -> Result<ConfigTree> {
    let prefix = source.prefix();
    let scoped = |tree: &ConfigTree| {
        tree.subtree(prefix)
            .map(|map| ConfigTree::from_map(map.clone()))
            .unwrap_or_default()
    };
    let fragment = source.produce(&scoped(preset), &scoped(fixed))?;
    Ok(fragment.nested_under(prefix))
}

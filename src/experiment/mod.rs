//! Experiment context and tracking records
//!
//! An [`Experiment`] owns everything a run is built from: the config source
//! registry, the named configs, the observers, and the main function.
//!
//! ## Record Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├──< MetricRecord (N)   [heartbeat, ordered by step]
//!                              ├──< ResourceRecord (N) [resource_opened]
//!                              └──< ArtifactRecord (N) [artifact_added]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use capstan::{Experiment, RunOptions, Signature};
//! use capstan::experiment::RunStatus;
//!
//! let mut ex = Experiment::new("mnist");
//! ex.config_scope("defaults", |cfg| {
//!     cfg.set("epochs", 3).set("lr", 0.01);
//!     Ok(())
//! });
//! ex.main(Signature::new("train").param("epochs").param("lr"), |_ctx, args| {
//!     let epochs: u32 = args.get("epochs")?;
//!     let lr: f64 = args.get("lr")?;
//!     Ok((epochs, lr))
//! });
//!
//! let run = ex.run(RunOptions::new().update("epochs", 10))?;
//! assert_eq!(run.status(), RunStatus::Completed);
//! assert_eq!(run.result(), Some(&serde_json::json!([10, 0.01])));
//! # Ok::<(), capstan::Error>(())
//! ```

mod artifact_record;
mod experiment_record;
mod metric_record;
mod run_record;

pub use artifact_record::{ArtifactRecord, ResourceRecord};
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use metric_record::MetricRecord;
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};

use crate::capture::{CapturedFunction, ResolvedArgs, Signature};
use crate::config::{
    ConfigDict, ConfigScope, ConfigSource, FileSource, MergePolicy, ResolvedConfig, ScopeContext,
    SourceRegistry,
};
use crate::observer::{EventBus, Observer};
use crate::run::{self, Run, RunContext, RunOptions};
use crate::telemetry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use ulid::Ulid;

/// A named, runnable unit of work.
pub struct Experiment {
    name: String,
    registry: SourceRegistry,
    bus: EventBus,
    main: Option<CapturedFunction<Value>>,
    captured: Vec<String>,
    created_at: DateTime<Utc>,
}

impl Experiment {
    /// Create an experiment with no sources, observers or main function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: SourceRegistry::new(),
            bus: EventBus::new(),
            main: None,
            captured: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a config source; later sources win at leaf level.
    pub fn add_config(&mut self, source: impl ConfigSource + 'static) -> &mut Self {
        self.registry.add(source);
        self
    }

    /// Append a declarative config scope.
    pub fn config_scope<F>(&mut self, name: impl Into<String>, body: F) -> &mut Self
    where
        F: Fn(&mut ScopeContext<'_>) -> anyhow::Result<()> + 'static,
    {
        self.add_config(ConfigScope::new(name, body))
    }

    /// Append a static mapping source.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigResolution` if `value` is not a JSON object.
    pub fn add_config_dict(&mut self, value: Value) -> Result<&mut Self> {
        let dict = ConfigDict::from_value(format!("config_dict_{}", self.registry.len()), value)?;
        Ok(self.add_config(dict))
    }

    /// Append a JSON, YAML or TOML file source.
    pub fn add_config_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.add_config(FileSource::new(path))
    }

    /// Register a named config, applied only when selected in [`RunOptions`].
    pub fn named_config(
        &mut self,
        name: impl Into<String>,
        source: impl ConfigSource + 'static,
    ) -> &mut Self {
        self.registry.add_named(name, source);
        self
    }

    /// Choose how kind-incompatible merge collisions are handled.
    pub fn merge_policy(&mut self, policy: MergePolicy) -> &mut Self {
        self.registry.set_policy(policy);
        self
    }

    /// Register an observer; delivery follows registration order.
    pub fn observe(&mut self, observer: Arc<dyn Observer>) -> &mut Self {
        self.bus.register(observer);
        self
    }

    /// Capture a function so its parameters are injected from the config.
    #[track_caller]
    pub fn capture<R, F>(&mut self, signature: Signature, body: F) -> CapturedFunction<R>
    where
        F: Fn(&mut RunContext<'_>, &ResolvedArgs) -> anyhow::Result<R> + 'static,
    {
        self.captured.push(signature.name().to_string());
        CapturedFunction::new(signature, body)
    }

    /// Capture the entry point of the experiment.
    ///
    /// The return value is serialized to JSON and becomes the run result.
    /// Setting a main function again replaces the previous one.
    #[track_caller]
    pub fn main<R, F>(&mut self, signature: Signature, body: F) -> CapturedFunction<Value>
    where
        R: Serialize,
        F: Fn(&mut RunContext<'_>, &ResolvedArgs) -> anyhow::Result<R> + 'static,
    {
        let main = CapturedFunction::new(signature, move |ctx, args| {
            let result = body(ctx, args)?;
            Ok(serde_json::to_value(result)?)
        });
        self.main = Some(main.clone());
        main
    }

    /// Resolve the configuration a run with `options` would see.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownNamedConfig` or `Error::ConfigResolution`.
    pub fn resolve_config(&self, options: &RunOptions) -> Result<ResolvedConfig> {
        let resolved = self
            .registry
            .resolve_with(options.named_configs(), options.overrides())?;
        tracing::debug!(
            experiment = %self.name,
            leaves = resolved.tree.leaves().len(),
            kind_changes = resolved.report.kind_changed.len(),
            "config resolved"
        );
        Ok(resolved)
    }

    /// Description handed to observers with the `started` event.
    #[must_use]
    pub fn record(&self) -> ExperimentRecord {
        let mut builder = ExperimentRecord::builder(&self.name)
            .sources(self.registry.source_names())
            .named_configs(self.registry.named_config_names())
            .captured(self.captured.clone())
            .created_at(self.created_at);
        if let Some(main) = &self.main {
            builder = builder.main(main.name());
        }
        builder.build()
    }

    /// Resolve the config, then execute the main function as a new run.
    ///
    /// # Errors
    ///
    /// - `Error::NoMainFunction` if no main function was set
    /// - config errors, before any run exists
    /// - `Error::UserCode` if the main function failed (after observers saw `failed`)
    /// - `Error::Interrupted` if the interrupt handle was raised
    ///
    /// # Panics
    ///
    /// Resumes a panic from the main function after it was reported as a
    /// failure of kind `Panic`.
    pub fn run(&self, options: RunOptions) -> Result<Run> {
        if let Some(level) = options.requested_log_level() {
            telemetry::init_tracing(Some(level));
        }
        let main = self
            .main
            .as_ref()
            .ok_or_else(|| Error::NoMainFunction(self.name.clone()))?;
        let resolved = self.resolve_config(&options)?;

        let run_id = options
            .explicit_run_id()
            .map_or_else(|| Ulid::new().to_string(), ToString::to_string);
        let span = tracing::info_span!("run", run_id = %run_id, experiment = %self.name);
        let _enter = span.enter();

        let mut run = Run::new(run_id, &self.name, Arc::new(resolved.tree));
        run::execute(&mut run, &self.bus, &self.record(), main, &options)?;
        Ok(run)
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("sources", &self.registry.source_names())
            .field("named_configs", &self.registry.named_config_names())
            .field("observers", &self.bus)
            .field("main", &self.main.as_ref().map(CapturedFunction::name))
            .field("captured", &self.captured)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_without_main() {
        let ex = Experiment::new("empty");
        assert!(matches!(
            ex.run(RunOptions::new()),
            Err(Error::NoMainFunction(name)) if name == "empty"
        ));
    }

    #[test]
    fn test_record_lists_parts() {
        let mut ex = Experiment::new("exp");
        ex.config_scope("defaults", |cfg| {
            cfg.set("a", 1);
            Ok(())
        });
        ex.named_config("fast", ConfigDict::new("fast", crate::config::ConfigTree::new()));
        let _helper: CapturedFunction<()> = ex.capture(Signature::new("helper"), |_, _| Ok(()));
        ex.main(Signature::new("entry"), |_, _| Ok(()));

        let record = ex.record();
        assert_eq!(record.main(), Some("entry"));
        assert_eq!(record.sources(), ["defaults".to_string()]);
        assert_eq!(record.named_configs(), ["fast".to_string()]);
        assert_eq!(record.captured(), ["helper".to_string()]);
    }

    #[test]
    fn test_explicit_run_id_and_result() {
        let mut ex = Experiment::new("exp");
        ex.add_config_dict(json!({"x": 2})).unwrap();
        ex.main(Signature::new("double").param("x"), |_, args| Ok(args.get::<i64>("x")? * 2));

        let run = ex.run(RunOptions::new().run_id("fixed-id")).unwrap();
        assert_eq!(run.id(), "fixed-id");
        assert_eq!(run.result(), Some(&json!(4)));
        assert!(run.stopped_at() >= run.started_at());
    }

    #[test]
    fn test_generated_run_ids_are_unique() {
        let mut ex = Experiment::new("exp");
        ex.main(Signature::new("noop"), |_, _| Ok(()));
        let a = ex.run(RunOptions::new()).unwrap();
        let b = ex.run(RunOptions::new()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 26);
    }

    #[test]
    fn test_unknown_named_config_fails_before_run() {
        let mut ex = Experiment::new("exp");
        ex.main(Signature::new("noop"), |_, _| Ok(()));
        let err = ex.run(RunOptions::new().with_named_config("missing")).unwrap_err();
        assert!(matches!(err, Error::UnknownNamedConfig(name) if name == "missing"));
    }
}

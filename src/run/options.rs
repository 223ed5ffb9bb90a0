//! Invocation parameters of a run.

use super::{Failure, InterruptHandle};
use crate::config::ConfigTree;
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

type PostMortemHook = Arc<dyn Fn(&Failure) + Send + Sync>;

/// Options for one `Experiment::run` call.
///
/// ```rust
/// use capstan::RunOptions;
///
/// let options = RunOptions::new()
///     .update("optimizer.lr", 0.01)
///     .parse_update("epochs=20")?
///     .with_named_config("fast");
///
/// assert_eq!(options.overrides().get("epochs"), Some(&serde_json::json!(20)));
/// assert!(options.filters_stacktrace());
/// # Ok::<(), capstan::Error>(())
/// ```
#[derive(Clone)]
pub struct RunOptions {
    overrides: ConfigTree,
    named_configs: Vec<String>,
    log_level: Option<Level>,
    filter_stacktrace: bool,
    post_mortem: Option<PostMortemHook>,
    interrupt: Option<InterruptHandle>,
    run_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            overrides: ConfigTree::new(),
            named_configs: Vec::new(),
            log_level: None,
            filter_stacktrace: true,
            post_mortem: None,
            interrupt: None,
            run_id: None,
        }
    }
}

impl RunOptions {
    /// Options with no overrides and stacktrace filtering enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the override tree.
    #[must_use]
    pub fn overrides_with(mut self, overrides: ConfigTree) -> Self {
        self.overrides = overrides;
        self
    }

    /// Override the value at a dotted path.
    #[must_use]
    pub fn update(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.overrides.set(path, value);
        self
    }

    /// Apply a `path=value` update.
    ///
    /// The value is parsed as JSON and taken as a plain string when it is not
    /// valid JSON, so `lr=0.1`, `name=resnet` and `layers=[64,32]` all work.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if the update has no `=` or an empty path.
    pub fn parse_update(self, update: &str) -> Result<Self> {
        let (path, raw) = update
            .split_once('=')
            .ok_or_else(|| {
                Error::Other(format!("Config update `{update}` is not of the form path=value"))
            })?;
        let path = path.trim();
        if path.is_empty() {
            return Err(Error::Other(format!("Config update `{update}` has an empty path")));
        }
        let raw = raw.trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(self.update(path, value))
    }

    /// Select a named config; later selections take precedence.
    #[must_use]
    pub fn with_named_config(mut self, name: impl Into<String>) -> Self {
        self.named_configs.push(name.into());
        self
    }

    /// Install a tracing subscriber at this level before running.
    #[must_use]
    pub const fn log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Enable or disable removal of engine frames from failure traces.
    #[must_use]
    pub const fn filter_stacktrace(mut self, enabled: bool) -> Self {
        self.filter_stacktrace = enabled;
        self
    }

    /// Hook invoked with the failure before observers hear about it.
    ///
    /// The failure's [`raw_trace`](Failure::raw_trace) is always the
    /// unfiltered one.
    #[must_use]
    pub fn post_mortem(mut self, hook: impl Fn(&Failure) + Send + Sync + 'static) -> Self {
        self.post_mortem = Some(Arc::new(hook));
        self
    }

    /// Interrupt handle observed by the run.
    #[must_use]
    pub fn interrupt(mut self, handle: InterruptHandle) -> Self {
        self.interrupt = Some(handle);
        self
    }

    /// Use `run_id` instead of a generated id.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Get the override tree.
    #[must_use]
    pub const fn overrides(&self) -> &ConfigTree {
        &self.overrides
    }

    /// Get the selected named configs.
    #[must_use]
    pub fn named_configs(&self) -> &[String] {
        &self.named_configs
    }

    /// Get the requested log level.
    #[must_use]
    pub const fn requested_log_level(&self) -> Option<Level> {
        self.log_level
    }

    /// Check if engine frames are removed from failure traces.
    #[must_use]
    pub const fn filters_stacktrace(&self) -> bool {
        self.filter_stacktrace
    }

    /// Get the interrupt handle, if any.
    #[must_use]
    pub const fn interrupt_handle(&self) -> Option<&InterruptHandle> {
        self.interrupt.as_ref()
    }

    /// Get the explicit run id, if any.
    #[must_use]
    pub fn explicit_run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub(crate) fn run_post_mortem(&self, failure: &Failure) {
        if let Some(hook) = &self.post_mortem {
            hook(failure);
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("overrides", &self.overrides)
            .field("named_configs", &self.named_configs)
            .field("log_level", &self.log_level)
            .field("filter_stacktrace", &self.filter_stacktrace)
            .field("post_mortem", &self.post_mortem.is_some())
            .field("interrupt", &self.interrupt)
            .field("run_id", &self.run_id)
            .finish()
    }
}

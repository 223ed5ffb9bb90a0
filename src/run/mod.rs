//! Run State Machine
//!
//! One execution of an experiment's main function:
//!
//! ```text
//! Created ──start──> Running ──┬─> Completed   (main returned a value)
//!                              ├─> Failed      (error or panic escaped main)
//!                              └─> Interrupted (interrupt flag observed)
//! ```
//!
//! Toyota Way: Poka-Yoke. Terminal states have no outgoing transitions, so a
//! run reports exactly one terminal event and nothing after it.

mod failure;
mod interrupt;
mod options;

pub use failure::{Failure, UserError, PANIC, USER_CODE_ERROR};
pub use interrupt::InterruptHandle;
pub use options::RunOptions;

use crate::capture::{inject, Args, CapturedFunction};
use crate::config::ConfigTree;
use crate::experiment::{
    ArtifactRecord, ExperimentRecord, MetricRecord, ResourceRecord, RunRecord, RunStatus,
};
use crate::observer::{panic_message, EventBus, RunEvent};
use crate::trace::StackFrame;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use failure::is_interrupt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe, Location};
use std::path::Path;
use std::sync::Arc;

/// One execution instance of an experiment.
#[derive(Debug, Clone)]
pub struct Run {
    id: String,
    experiment: String,
    config: Arc<ConfigTree>,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    failure: Option<Failure>,
    info: Map<String, Value>,
    resources: Vec<ResourceRecord>,
    artifacts: Vec<ArtifactRecord>,
    metrics: Vec<MetricRecord>,
    flushed: usize,
    next_step: HashMap<String, u64>,
}

impl Run {
    /// Create a run in `Created` with a frozen config snapshot.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        experiment: impl Into<String>,
        config: Arc<ConfigTree>,
    ) -> Self {
        Self {
            id: id.into(),
            experiment: experiment.into(),
            config,
            status: RunStatus::Created,
            started_at: None,
            stopped_at: None,
            result: None,
            failure: None,
            info: Map::new(),
            resources: Vec::new(),
            artifacts: Vec::new(),
            metrics: Vec::new(),
            flushed: 0,
            next_step: HashMap::new(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Get the frozen configuration.
    #[must_use]
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the stop timestamp.
    #[must_use]
    pub const fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    /// Get the result of a completed run.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Get the failure of a failed run.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Get the user-attached info.
    #[must_use]
    pub const fn info(&self) -> &Map<String, Value> {
        &self.info
    }

    /// Get the resources opened during the run.
    #[must_use]
    pub fn resources(&self) -> &[ResourceRecord] {
        &self.resources
    }

    /// Get the artifacts added during the run.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Get every metric logged during the run.
    #[must_use]
    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Snapshot handed to observers.
    #[must_use]
    pub fn record(&self) -> RunRecord {
        RunRecord::builder(&self.id, &self.experiment)
            .status(self.status)
            .config(Arc::clone(&self.config))
            .started_at(self.started_at)
            .stopped_at(self.stopped_at)
            .info(self.info.clone())
            .resources(self.resources.clone())
            .artifacts(self.artifacts.clone())
            .build()
    }

    fn transition(&mut self, to: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        if to == RunStatus::Running {
            self.started_at = Some(Utc::now());
        } else {
            self.stopped_at = Some(Utc::now());
        }
        Ok(())
    }

    /// `Created -> Running`, emitting `started`.
    pub(crate) fn start(&mut self, bus: &EventBus, experiment: &ExperimentRecord) -> Result<()> {
        self.transition(RunStatus::Running)?;
        tracing::info!(run_id = %self.id, experiment = %self.experiment, "run started");
        bus.notify(&RunEvent::Started {
            run: self.record(),
            experiment: experiment.clone(),
        });
        Ok(())
    }

    /// `Running -> Completed`, emitting `completed`.
    pub(crate) fn complete(&mut self, bus: &EventBus, result: Value) -> Result<()> {
        self.finish(bus, RunStatus::Completed)?;
        self.result = Some(result.clone());
        tracing::info!(run_id = %self.id, "run completed");
        bus.notify(&RunEvent::Completed {
            run: self.record(),
            result,
        });
        Ok(())
    }

    /// `Running -> Failed`, emitting `failed`.
    pub(crate) fn fail(&mut self, bus: &EventBus, failure: Failure) -> Result<()> {
        self.finish(bus, RunStatus::Failed)?;
        self.failure = Some(failure.clone());
        bus.notify(&RunEvent::Failed {
            run: self.record(),
            failure,
        });
        Ok(())
    }

    /// `Running -> Interrupted`, emitting `interrupted`.
    pub(crate) fn interrupt(&mut self, bus: &EventBus) -> Result<()> {
        self.finish(bus, RunStatus::Interrupted)?;
        tracing::warn!(run_id = %self.id, "run interrupted");
        bus.notify(&RunEvent::Interrupted { run: self.record() });
        Ok(())
    }

    /// Flush buffered metrics, then enter the terminal state.
    fn finish(&mut self, bus: &EventBus, to: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition { from: self.status, to });
        }
        if self.flushed < self.metrics.len() {
            self.heartbeat(bus);
        }
        self.transition(to)
    }

    fn heartbeat(&mut self, bus: &EventBus) {
        if self.status != RunStatus::Running {
            return;
        }
        let metrics = self.metrics[self.flushed..].to_vec();
        self.flushed = self.metrics.len();
        bus.notify(&RunEvent::Heartbeat {
            run: self.record(),
            metrics,
        });
    }
}

#[track_caller]
fn engine_frame(function: &str) -> StackFrame {
    StackFrame::engine(function, Location::caller().to_string())
}

/// Handle given to captured functions while a run is executing.
///
/// Captured functions call each other through [`RunContext::call`], which
/// injects arguments from the frozen config and records the frame stack used
/// for failure traces.
pub struct RunContext<'a> {
    run: &'a mut Run,
    bus: &'a EventBus,
    interrupt: Option<InterruptHandle>,
    frames: Vec<StackFrame>,
    failure_trace: Option<TraceSnapshot>,
}

/// Frame stack captured where an error first surfaced, tagged with the
/// error it belongs to.
#[derive(Debug)]
struct TraceSnapshot {
    root: usize,
    message: String,
    frames: Vec<StackFrame>,
}

impl TraceSnapshot {
    fn belongs_to(&self, error: &anyhow::Error) -> bool {
        let root = error.root_cause();
        self.root == error_address(root) && self.message == root.to_string()
    }
}

/// Heap address of an error's root cause; stable while the error propagates.
fn error_address(root: &(dyn std::error::Error + 'static)) -> usize {
    std::ptr::from_ref(root).cast::<()>() as usize
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        run: &'a mut Run,
        bus: &'a EventBus,
        interrupt: Option<InterruptHandle>,
    ) -> Self {
        Self {
            run,
            bus,
            interrupt,
            frames: Vec::new(),
            failure_trace: None,
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    /// Get the frozen configuration.
    #[must_use]
    pub fn config(&self) -> &ConfigTree {
        &self.run.config
    }

    /// Get the info attached so far.
    #[must_use]
    pub const fn info(&self) -> &Map<String, Value> {
        &self.run.info
    }

    /// Call a captured function with no explicit arguments.
    ///
    /// # Errors
    ///
    /// Returns the injection error (`MissingParameter`, ...), an
    /// `Interrupted` error if the interrupt flag is raised, or whatever the
    /// function itself returns.
    #[track_caller]
    pub fn call<R>(&mut self, function: &CapturedFunction<R>) -> anyhow::Result<R> {
        self.call_with(function, &Args::new())
    }

    /// Call a captured function with explicit arguments; they win over config
    /// for this call only.
    ///
    /// # Errors
    ///
    /// Same as [`RunContext::call`], plus argument validation errors.
    #[track_caller]
    pub fn call_with<R>(
        &mut self,
        function: &CapturedFunction<R>,
        args: &Args,
    ) -> anyhow::Result<R> {
        self.dispatch(function, args, Location::caller())
    }

    fn dispatch<R>(
        &mut self,
        function: &CapturedFunction<R>,
        args: &Args,
        location: &Location<'_>,
    ) -> anyhow::Result<R> {
        let depth = self.frames.len();
        self.failure_trace = None;
        self.frames.push(engine_frame("capstan::run::RunContext::call"));

        let outcome = self.enter(function, args, location);

        match &outcome {
            Ok(_) => self.failure_trace = None,
            // An error propagating outward keeps the deepest stack it was seen at.
            Err(error) if self.failure_trace.as_ref().is_some_and(|s| s.belongs_to(error)) => {}
            Err(error) => {
                let root = error.root_cause();
                self.failure_trace = Some(TraceSnapshot {
                    root: error_address(root),
                    message: root.to_string(),
                    frames: self.frames.clone(),
                });
            }
        }
        self.frames.truncate(depth);
        outcome
    }

    fn enter<R>(
        &mut self,
        function: &CapturedFunction<R>,
        args: &Args,
        location: &Location<'_>,
    ) -> anyhow::Result<R> {
        self.check_interrupt()?;

        self.frames.push(engine_frame("capstan::capture::inject"));
        let config = Arc::clone(&self.run.config);
        let empty = Map::new();
        let subtree = config.subtree(function.prefix()).unwrap_or(&empty);
        let resolved = inject(function.signature(), args, subtree)?;
        self.frames.pop();

        tracing::trace!(
            run_id = %self.run.id,
            function = function.name(),
            prefix = function.prefix(),
            "calling captured function"
        );
        self.frames.push(StackFrame::user(function.name(), Some(location.to_string())));
        function.invoke(self, &resolved)
    }

    /// Fail with `Error::Interrupted` if the interrupt flag is raised.
    ///
    /// # Errors
    ///
    /// Returns `Error::Interrupted` once an interruption was requested.
    pub fn check_interrupt(&self) -> Result<()> {
        match &self.interrupt {
            Some(handle) if handle.is_interrupted() => Err(Error::Interrupted {
                run_id: self.run.id.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Attach metadata to the run and emit a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if `value` cannot be serialized.
    pub fn add_info(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.run.info.insert(key.into(), value);
        self.run.heartbeat(self.bus);
        Ok(())
    }

    /// Emit a heartbeat carrying the metrics logged since the previous one.
    pub fn heartbeat(&mut self) {
        self.run.heartbeat(self.bus);
    }

    /// Log a scalar metric; delivered with the next heartbeat.
    ///
    /// Without an explicit `step`, steps count up per key from 0.
    pub fn log_scalar(&mut self, key: impl Into<String>, value: f64, step: Option<u64>) {
        let key = key.into();
        let next = self.run.next_step.entry(key.clone()).or_insert(0);
        let step = step.unwrap_or(*next);
        *next = step.saturating_add(1);
        self.run.metrics.push(MetricRecord::new(&self.run.id, key, step, value));
    }

    /// Open a file for reading and report it as a resource of the run.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be opened.
    pub fn open_resource(&mut self, path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let resource = ResourceRecord::new(&self.run.id, path);
        self.run.resources.push(resource.clone());
        tracing::debug!(run_id = %self.run.id, path = %path.display(), "resource opened");
        self.bus.notify(&RunEvent::ResourceOpened {
            run: self.run.record(),
            resource,
        });
        Ok(file)
    }

    /// Attach an existing file as an artifact of the run.
    ///
    /// The artifact name defaults to the file name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file metadata cannot be read.
    pub fn add_artifact(
        &mut self,
        path: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<ArtifactRecord> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        let name = name.map_or_else(
            || {
                path.file_name().map_or_else(
                    || path.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                )
            },
            ToString::to_string,
        );
        let artifact = ArtifactRecord::new(&self.run.id, name, path, size);
        self.run.artifacts.push(artifact.clone());
        tracing::debug!(run_id = %self.run.id, artifact = artifact.name(), size, "artifact added");
        self.bus.notify(&RunEvent::ArtifactAdded {
            run: self.run.record(),
            artifact: artifact.clone(),
        });
        Ok(artifact)
    }
}

impl std::fmt::Debug for RunContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run.id)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

/// Drive `run` from `Created` to a terminal state by calling `main`.
///
/// Errors are recorded as the run's failure, reported to observers, and then
/// returned; panics are recorded the same way and then resumed.
pub(crate) fn execute(
    run: &mut Run,
    bus: &EventBus,
    experiment: &ExperimentRecord,
    main: &CapturedFunction<Value>,
    options: &RunOptions,
) -> Result<()> {
    run.start(bus, experiment)?;

    let mut context = RunContext::new(run, bus, options.interrupt_handle().cloned());
    context.frames.push(engine_frame("capstan::run::execute"));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        context.dispatch(main, &Args::new(), main.defined_at())
    }));
    // After a panic the frame stack was never unwound, so it is the live one.
    let raw_trace = match &outcome {
        Err(_) => context.frames.clone(),
        Ok(_) => context
            .failure_trace
            .take()
            .map_or_else(|| context.frames.clone(), |snapshot| snapshot.frames),
    };
    drop(context);

    let filter = options.filters_stacktrace();
    match outcome {
        Ok(Ok(value)) => run.complete(bus, value),
        Ok(Err(error)) if is_interrupt(&error) => {
            run.interrupt(bus)?;
            Err(Error::Interrupted { run_id: run.id.clone() })
        }
        Ok(Err(error)) => {
            let failure = Failure::from_error(&error, raw_trace, filter);
            report_failure(run, bus, &failure, options)?;
            Err(Error::UserCode {
                run_id: run.id.clone(),
                failure: Box::new(failure),
            })
        }
        Err(payload) => {
            let failure = Failure::from_panic(payload.as_ref(), raw_trace, filter);
            report_failure(run, bus, &failure, options)?;
            panic::resume_unwind(payload)
        }
    }
}

fn report_failure(
    run: &mut Run,
    bus: &EventBus,
    failure: &Failure,
    options: &RunOptions,
) -> Result<()> {
    tracing::error!(
        run_id = %run.id,
        kind = failure.kind(),
        message = failure.message(),
        "run failed\n{}",
        failure.format_trace()
    );
    if let Err(payload) =
        panic::catch_unwind(AssertUnwindSafe(|| options.run_post_mortem(failure)))
    {
        tracing::warn!(
            run_id = %run.id,
            reason = %panic_message(payload.as_ref()),
            "post-mortem hook panicked; continuing"
        );
    }
    run.fail(bus, failure.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Signature;
    use crate::observer::MemoryObserver;
    use serde_json::json;

    fn config() -> Arc<ConfigTree> {
        let mut tree = ConfigTree::new();
        tree.set("foo", 42);
        tree.set("bar", "baz");
        Arc::new(tree)
    }

    fn bus_with(observer: &Arc<MemoryObserver>) -> EventBus {
        let mut bus = EventBus::new();
        bus.register(observer.clone());
        bus
    }

    fn experiment() -> ExperimentRecord {
        ExperimentRecord::builder("exp").build()
    }

    #[test]
    fn test_no_transition_out_of_terminal_state() {
        let observer = Arc::new(MemoryObserver::new());
        let bus = bus_with(&observer);
        let mut run = Run::new("run-1", "exp", config());

        run.start(&bus, &experiment()).unwrap();
        run.complete(&bus, json!(1)).unwrap();

        let err = run.interrupt(&bus).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: RunStatus::Completed,
                to: RunStatus::Interrupted
            }
        ));
        assert!(run.start(&bus, &experiment()).is_err());
        assert_eq!(observer.event_names(), vec!["started", "completed"]);
    }

    #[test]
    fn test_cannot_complete_before_start() {
        let bus = EventBus::new();
        let mut run = Run::new("run-1", "exp", config());
        assert!(run.complete(&bus, Value::Null).is_err());
        assert_eq!(run.status(), RunStatus::Created);
    }

    #[test]
    fn test_metrics_flushed_before_terminal_event() {
        let observer = Arc::new(MemoryObserver::new());
        let bus = bus_with(&observer);
        let mut run = Run::new("run-1", "exp", config());
        run.start(&bus, &experiment()).unwrap();

        {
            let mut context = RunContext::new(&mut run, &bus, None);
            context.log_scalar("loss", 0.9, None);
            context.log_scalar("loss", 0.5, None);
            context.log_scalar("loss", 0.1, Some(10));
        }
        run.complete(&bus, Value::Null).unwrap();

        assert_eq!(observer.event_names(), vec!["started", "heartbeat", "completed"]);
        let steps: Vec<u64> = observer
            .get_metrics_for_run("run-1", "loss")
            .iter()
            .map(MetricRecord::step)
            .collect();
        assert_eq!(steps, vec![0, 1, 10]);
    }

    #[test]
    fn test_call_injects_from_prefix() {
        let bus = EventBus::new();
        let mut tree = ConfigTree::new();
        tree.set("optimizer.lr", 0.1);
        let mut run = Run::new("run-1", "exp", Arc::new(tree));
        run.start(&bus, &experiment()).unwrap();

        let lr = CapturedFunction::new(Signature::new("lr").param("lr"), |_, args| {
            Ok(args.get::<f64>("lr")?)
        })
        .with_prefix("optimizer");

        let mut context = RunContext::new(&mut run, &bus, None);
        assert!((context.call(&lr).unwrap() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_trace_snapshot_is_innermost() {
        let bus = EventBus::new();
        let mut run = Run::new("run-1", "exp", config());
        run.start(&bus, &experiment()).unwrap();

        let inner: CapturedFunction<()> =
            CapturedFunction::new(Signature::new("inner"), |_, _| anyhow::bail!("boom"));
        let outer = {
            let inner = inner.clone();
            CapturedFunction::new(Signature::new("outer"), move |ctx, _| ctx.call(&inner))
        };

        let mut context = RunContext::new(&mut run, &bus, None);
        assert!(context.call(&outer).is_err());

        let trace = context.failure_trace.take().unwrap().frames;
        let users: Vec<&str> =
            trace.iter().filter(|f| !f.is_engine()).map(StackFrame::function).collect();
        assert_eq!(users, vec!["outer", "inner"]);
        assert!(context.frames.is_empty());
    }

    #[test]
    fn test_interrupt_observed_at_next_call() {
        let bus = EventBus::new();
        let mut run = Run::new("run-1", "exp", config());
        run.start(&bus, &experiment()).unwrap();
        let handle = InterruptHandle::new();
        let noop: CapturedFunction<()> =
            CapturedFunction::new(Signature::new("noop"), |_, _| Ok(()));

        let mut context = RunContext::new(&mut run, &bus, Some(handle.clone()));
        assert!(context.call(&noop).is_ok());
        handle.interrupt();
        let err = context.call(&noop).unwrap_err();
        assert!(is_interrupt(&err));
    }

    #[test]
    fn test_add_info_emits_heartbeat() {
        let observer = Arc::new(MemoryObserver::new());
        let bus = bus_with(&observer);
        let mut run = Run::new("run-1", "exp", config());
        run.start(&bus, &experiment()).unwrap();

        let mut context = RunContext::new(&mut run, &bus, None);
        context.add_info("host", "gpu-01").unwrap();

        let last = observer.events().pop().unwrap();
        assert_eq!(last.name(), "heartbeat");
        assert_eq!(last.run().info()["host"], json!("gpu-01"));
    }
}

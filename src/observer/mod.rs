//! Event Bus / Observer Dispatch
//!
//! Every state transition of a run is reported synchronously, in
//! registration order, to each registered [`Observer`].
//!
//! Toyota Way: Jidoka without stopping the line. A failing observer (error
//! or panic) is logged and skipped; the run and the remaining observers are
//! unaffected.
//!
//! ```text
//! Run ──RunEvent──> EventBus ──> observer 1
//!                            ├─> observer 2   (error/panic caught + logged)
//!                            └─> observer 3
//! ```

mod memory;

pub use memory::MemoryObserver;

use crate::experiment::{
    ArtifactRecord, ExperimentRecord, MetricRecord, ResourceRecord, RunRecord,
};
use crate::run::Failure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Listener for run lifecycle events.
///
/// Every method has a no-op default, so an observer implements only the
/// events it cares about.
pub trait Observer: Send + Sync {
    /// Name used when logging delivery failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The run entered `Running`.
    fn started(&self, _run: &RunRecord, _experiment: &ExperimentRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// Info was attached or metrics were flushed while running.
    fn heartbeat(&self, _run: &RunRecord, _metrics: &[MetricRecord]) -> anyhow::Result<()> {
        Ok(())
    }

    /// The main function returned `result`.
    fn completed(&self, _run: &RunRecord, _result: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// The main function failed.
    fn failed(&self, _run: &RunRecord, _failure: &Failure) -> anyhow::Result<()> {
        Ok(())
    }

    /// The run was interrupted.
    fn interrupted(&self, _run: &RunRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// A resource was opened through the run.
    fn resource_opened(&self, _run: &RunRecord, _resource: &ResourceRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// An artifact was attached to the run.
    fn artifact_added(&self, _run: &RunRecord, _artifact: &ArtifactRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Lifecycle event with the run snapshot at the instant it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// `Created -> Running`
    Started {
        /// Run snapshot
        run: RunRecord,
        /// Experiment description
        experiment: ExperimentRecord,
    },
    /// Info update and/or metric flush
    Heartbeat {
        /// Run snapshot
        run: RunRecord,
        /// Metrics logged since the previous heartbeat
        metrics: Vec<MetricRecord>,
    },
    /// `Running -> Completed`
    Completed {
        /// Run snapshot
        run: RunRecord,
        /// Return value of the main function
        result: Value,
    },
    /// `Running -> Failed`
    Failed {
        /// Run snapshot
        run: RunRecord,
        /// Failure record
        failure: Failure,
    },
    /// `Running -> Interrupted`
    Interrupted {
        /// Run snapshot
        run: RunRecord,
    },
    /// A resource was opened
    ResourceOpened {
        /// Run snapshot
        run: RunRecord,
        /// The resource
        resource: ResourceRecord,
    },
    /// An artifact was added
    ArtifactAdded {
        /// Run snapshot
        run: RunRecord,
        /// The artifact
        artifact: ArtifactRecord,
    },
}

impl RunEvent {
    /// Run snapshot carried by the event.
    #[must_use]
    pub const fn run(&self) -> &RunRecord {
        match self {
            Self::Started { run, .. }
            | Self::Heartbeat { run, .. }
            | Self::Completed { run, .. }
            | Self::Failed { run, .. }
            | Self::Interrupted { run }
            | Self::ResourceOpened { run, .. }
            | Self::ArtifactAdded { run, .. } => run,
        }
    }

    /// Event name (`"started"`, `"heartbeat"`, ...).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Interrupted { .. } => "interrupted",
            Self::ResourceOpened { .. } => "resource_opened",
            Self::ArtifactAdded { .. } => "artifact_added",
        }
    }

    /// Check if this event ends the run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Interrupted { .. }
        )
    }
}

/// Ordered set of observers.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Vec<Arc<dyn Observer>>,
}

impl EventBus {
    /// Create a bus with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer; delivery follows registration order.
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Check if no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer.
    ///
    /// Returns the number of observers whose delivery failed. Failures are
    /// logged and never propagate.
    pub fn notify(&self, event: &RunEvent) -> usize {
        let mut failures = 0;
        for observer in &self.observers {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| deliver(observer.as_ref(), event)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => format!("{error:#}"),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            failures += 1;
            tracing::warn!(
                observer = observer.name(),
                event = event.name(),
                run_id = event.run().run_id(),
                reason = %reason,
                "observer failed; continuing"
            );
        }
        failures
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.observers.iter().map(|o| o.name()).collect();
        f.debug_struct("EventBus").field("observers", &names).finish()
    }
}

fn deliver(observer: &dyn Observer, event: &RunEvent) -> anyhow::Result<()> {
    match event {
        RunEvent::Started { run, experiment } => observer.started(run, experiment),
        RunEvent::Heartbeat { run, metrics } => observer.heartbeat(run, metrics),
        RunEvent::Completed { run, result } => observer.completed(run, result),
        RunEvent::Failed { run, failure } => observer.failed(run, failure),
        RunEvent::Interrupted { run } => observer.interrupted(run),
        RunEvent::ResourceOpened { run, resource } => observer.resource_opened(run, resource),
        RunEvent::ArtifactAdded { run, artifact } => observer.artifact_added(run, artifact),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

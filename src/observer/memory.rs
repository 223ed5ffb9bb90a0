//! In-memory recording observer
//!
//! Keeps every event it receives, the latest snapshot of each run, and the
//! metrics and artifacts reported for them. Data is lost when the observer
//! is dropped.

use super::{Observer, RunEvent};
use crate::experiment::{ArtifactRecord, ExperimentRecord, MetricRecord, ResourceRecord, RunRecord};
use crate::run::Failure;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Observer that records everything in memory.
///
/// ## Example
///
/// ```rust
/// use capstan::observer::MemoryObserver;
///
/// let observer = MemoryObserver::new();
/// assert!(observer.is_empty());
/// assert_eq!(observer.run_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemoryObserver {
    log: Mutex<MemoryLog>,
}

#[derive(Debug, Default)]
struct MemoryLog {
    events: Vec<RunEvent>,
    runs: HashMap<String, RunRecord>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
}

impl MemoryObserver {
    /// Create a new empty observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, MemoryLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: RunEvent) {
        let mut log = self.log();
        let run = event.run().clone();
        match &event {
            RunEvent::Heartbeat { metrics, .. } => log.metrics.extend(metrics.iter().cloned()),
            RunEvent::ArtifactAdded { artifact, .. } => log.artifacts.push(artifact.clone()),
            _ => {}
        }
        log.runs.insert(run.run_id().to_string(), run);
        log.events.push(event);
    }

    /// Check if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log().events.is_empty()
    }

    /// All recorded events in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.log().events.clone()
    }

    /// Names of the recorded events in delivery order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        self.log().events.iter().map(RunEvent::name).collect()
    }

    /// Recorded events of one run.
    #[must_use]
    pub fn events_for_run(&self, run_id: &str) -> Vec<RunEvent> {
        self.log()
            .events
            .iter()
            .filter(|e| e.run().run_id() == run_id)
            .cloned()
            .collect()
    }

    /// Number of distinct runs seen.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.log().runs.len()
    }

    /// Latest snapshot of a run.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.log().runs.get(run_id).cloned()
    }

    /// Number of metric points received.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.log().metrics.len()
    }

    /// Get metrics for a specific run and key, ordered by step.
    #[must_use]
    pub fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .log()
            .metrics
            .iter()
            .filter(|m| m.run_id() == run_id && m.key() == key)
            .cloned()
            .collect();

        // Sort by step for time-series ordering
        metrics.sort_by_key(MetricRecord::step);

        metrics
    }

    /// Artifacts reported for a run.
    #[must_use]
    pub fn artifacts_for_run(&self, run_id: &str) -> Vec<ArtifactRecord> {
        self.log()
            .artifacts
            .iter()
            .filter(|a| a.run_id() == run_id)
            .cloned()
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        *self.log() = MemoryLog::default();
    }
}

impl Observer for MemoryObserver {
    fn name(&self) -> &str {
        "memory"
    }

    fn started(&self, run: &RunRecord, experiment: &ExperimentRecord) -> anyhow::Result<()> {
        self.record(RunEvent::Started {
            run: run.clone(),
            experiment: experiment.clone(),
        });
        Ok(())
    }

    fn heartbeat(&self, run: &RunRecord, metrics: &[MetricRecord]) -> anyhow::Result<()> {
        self.record(RunEvent::Heartbeat {
            run: run.clone(),
            metrics: metrics.to_vec(),
        });
        Ok(())
    }

    fn completed(&self, run: &RunRecord, result: &Value) -> anyhow::Result<()> {
        self.record(RunEvent::Completed {
            run: run.clone(),
            result: result.clone(),
        });
        Ok(())
    }

    fn failed(&self, run: &RunRecord, failure: &Failure) -> anyhow::Result<()> {
        self.record(RunEvent::Failed {
            run: run.clone(),
            failure: failure.clone(),
        });
        Ok(())
    }

    fn interrupted(&self, run: &RunRecord) -> anyhow::Result<()> {
        self.record(RunEvent::Interrupted { run: run.clone() });
        Ok(())
    }

    fn resource_opened(&self, run: &RunRecord, resource: &ResourceRecord) -> anyhow::Result<()> {
        self.record(RunEvent::ResourceOpened {
            run: run.clone(),
            resource: resource.clone(),
        });
        Ok(())
    }

    fn artifact_added(&self, run: &RunRecord, artifact: &ArtifactRecord) -> anyhow::Result<()> {
        self.record(RunEvent::ArtifactAdded {
            run: run.clone(),
            artifact: artifact.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::RunStatus;

    fn running(run_id: &str) -> RunRecord {
        RunRecord::builder(run_id, "exp").status(RunStatus::Running).build()
    }

    #[test]
    fn test_memory_observer_default() {
        let observer = MemoryObserver::new();
        assert!(observer.is_empty());
        assert_eq!(observer.run_count(), 0);
        assert_eq!(observer.metric_count(), 0);
    }

    #[test]
    fn test_get_metrics_for_run_ordering() {
        let observer = MemoryObserver::new();

        // Add out of order
        observer
            .heartbeat(
                &running("run-1"),
                &[
                    MetricRecord::new("run-1", "loss", 2, 0.2),
                    MetricRecord::new("run-1", "loss", 0, 0.0),
                    MetricRecord::new("run-2", "loss", 1, 0.9),
                ],
            )
            .unwrap();
        observer
            .heartbeat(&running("run-1"), &[MetricRecord::new("run-1", "loss", 1, 0.1)])
            .unwrap();

        let metrics = observer.get_metrics_for_run("run-1", "loss");

        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].step(), 0);
        assert_eq!(metrics[1].step(), 1);
        assert_eq!(metrics[2].step(), 2);
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let observer = MemoryObserver::new();
        observer
            .started(&running("run-1"), &ExperimentRecord::builder("exp").build())
            .unwrap();
        observer
            .interrupted(&RunRecord::builder("run-1", "exp").status(RunStatus::Interrupted).build())
            .unwrap();

        assert_eq!(observer.run_count(), 1);
        assert_eq!(observer.get_run("run-1").unwrap().status(), RunStatus::Interrupted);
        assert_eq!(observer.event_names(), vec!["started", "interrupted"]);
    }

    #[test]
    fn test_clear() {
        let observer = MemoryObserver::new();
        observer.interrupted(&running("run-1")).unwrap();
        observer.clear();
        assert!(observer.is_empty());
        assert!(observer.get_run("run-1").is_none());
    }
}

//! Run Record - snapshot of one execution of an experiment

use super::{ArtifactRecord, ResourceRecord};
use crate::config::ConfigTree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is created and its config snapshot taken, but not started.
    Created,
    /// Main function is executing.
    Running,
    /// Main function returned a value.
    Completed,
    /// An error propagated out of the main function.
    Failed,
    /// An external interruption signal was observed while running.
    Interrupted,
}

impl RunStatus {
    /// Check if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }

    /// Check if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Created => matches!(next, Self::Running),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Interrupted => false,
        }
    }
}

/// Run Record is the snapshot of a run handed to observers.
///
/// It carries the frozen configuration, the timestamps and everything the
/// user attached while running (info, resources, artifacts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: String,
    experiment: String,
    status: RunStatus,
    config: Arc<ConfigTree>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    info: Map<String, Value>,
    resources: Vec<ResourceRecord>,
    artifacts: Vec<ArtifactRecord>,
}

impl RunRecord {
    /// Create a builder for a run record.
    #[must_use]
    pub fn builder(run_id: impl Into<String>, experiment: impl Into<String>) -> RunRecordBuilder {
        RunRecordBuilder::new(run_id, experiment)
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Get the run status at snapshot time.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the frozen configuration.
    #[must_use]
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Get the start timestamp, if the run has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the stop timestamp, if the run has ended.
    #[must_use]
    pub const fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    /// Get the user-attached info.
    #[must_use]
    pub const fn info(&self) -> &Map<String, Value> {
        &self.info
    }

    /// Get the resources opened so far.
    #[must_use]
    pub fn resources(&self) -> &[ResourceRecord] {
        &self.resources
    }

    /// Get the artifacts added so far.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    record: RunRecord,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self {
            record: RunRecord {
                run_id: run_id.into(),
                experiment: experiment.into(),
                status: RunStatus::Created,
                config: Arc::new(ConfigTree::new()),
                started_at: None,
                stopped_at: None,
                info: Map::new(),
                resources: Vec::new(),
                artifacts: Vec::new(),
            },
        }
    }

    /// Set the status.
    #[must_use]
    pub const fn status(mut self, status: RunStatus) -> Self {
        self.record.status = status;
        self
    }

    /// Set the frozen configuration.
    #[must_use]
    pub fn config(mut self, config: Arc<ConfigTree>) -> Self {
        self.record.config = config;
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub const fn started_at(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.record.started_at = started_at;
        self
    }

    /// Set the stop timestamp.
    #[must_use]
    pub const fn stopped_at(mut self, stopped_at: Option<DateTime<Utc>>) -> Self {
        self.record.stopped_at = stopped_at;
        self
    }

    /// Set the info map.
    #[must_use]
    pub fn info(mut self, info: Map<String, Value>) -> Self {
        self.record.info = info;
        self
    }

    /// Set the opened resources.
    #[must_use]
    pub fn resources(mut self, resources: Vec<ResourceRecord>) -> Self {
        self.record.resources = resources;
        self
    }

    /// Set the added artifacts.
    #[must_use]
    pub fn artifacts(mut self, artifacts: Vec<ArtifactRecord>) -> Self {
        self.record.artifacts = artifacts;
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_record_default_status() {
        let run = RunRecord::builder("run-1", "exp").build();
        assert_eq!(run.status(), RunStatus::Created);
        assert!(run.started_at().is_none());
        assert!(run.config().is_empty());
    }

    #[test]
    fn test_transition_table() {
        use RunStatus::{Completed, Created, Failed, Interrupted, Running};

        assert!(Created.can_transition_to(Running));
        assert!(!Created.can_transition_to(Completed));
        for terminal in [Completed, Failed, Interrupted] {
            assert!(Running.can_transition_to(terminal));
            assert!(terminal.is_terminal());
            for next in [Created, Running, Completed, Failed, Interrupted] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn test_run_record_serialization() {
        let run = RunRecord::builder("run-2", "exp")
            .status(RunStatus::Running)
            .started_at(Some(Utc::now()))
            .build();

        let json = serde_json::to_string(&run).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(run, back);
    }
}

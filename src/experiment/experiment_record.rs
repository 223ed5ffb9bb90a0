//! Experiment Record - description of an experiment handed to observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Experiment Record describes the experiment a run belongs to.
///
/// Delivered with the `started` event so observers can persist what the run
/// was built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    name: String,
    main: Option<String>,
    sources: Vec<String>,
    named_configs: Vec<String>,
    captured: Vec<String>,
    created_at: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Create a builder for constructing an experiment record.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(name)
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the main function name, if set.
    #[must_use]
    pub fn main(&self) -> Option<&str> {
        self.main.as_deref()
    }

    /// Get the default config source names in registration order.
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Get the registered named config names.
    #[must_use]
    pub fn named_configs(&self) -> &[String] {
        &self.named_configs
    }

    /// Get the captured function names.
    #[must_use]
    pub fn captured(&self) -> &[String] {
        &self.captured
    }

    /// Get the creation timestamp of the experiment.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    record: ExperimentRecord,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with the experiment name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            record: ExperimentRecord {
                name: name.into(),
                main: None,
                sources: Vec::new(),
                named_configs: Vec::new(),
                captured: Vec::new(),
                created_at: Utc::now(),
            },
        }
    }

    /// Set the main function name.
    #[must_use]
    pub fn main(mut self, main: impl Into<String>) -> Self {
        self.record.main = Some(main.into());
        self
    }

    /// Set the config source names.
    #[must_use]
    pub fn sources(mut self, sources: Vec<String>) -> Self {
        self.record.sources = sources;
        self
    }

    /// Set the named config names.
    #[must_use]
    pub fn named_configs(mut self, named_configs: Vec<String>) -> Self {
        self.record.named_configs = named_configs;
        self
    }

    /// Set the captured function names.
    #[must_use]
    pub fn captured(mut self, captured: Vec<String>) -> Self {
        self.record.captured = captured;
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        self.record
    }
}

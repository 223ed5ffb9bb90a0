//! Artifact and Resource Records - files attached to a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Artifact Record represents a file produced by a run.
///
/// The run only keeps a reference; storing the content is up to the
/// observers receiving the `artifact_added` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    run_id: String,
    name: String,
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record.
    ///
    /// # Arguments
    ///
    /// * `run_id` - ID of the parent run
    /// * `name` - Artifact name (e.g., "model.pt", "checkpoint.ckpt")
    /// * `path` - Location of the file on disk
    /// * `size_bytes` - Size of the artifact in bytes
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            name: name.into(),
            path: path.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Resource Record represents a file opened for reading during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord {
    run_id: String,
    path: PathBuf,
    opened_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Create a new resource record stamped with the current time.
    #[must_use]
    pub fn new(run_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            path: path.into(),
            opened_at: Utc::now(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the resource path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the time the resource was opened.
    #[must_use]
    pub const fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

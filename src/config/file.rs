//! File-backed config sources (JSON, YAML, TOML).

use super::{ConfigSource, ConfigTree};
use crate::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `.json`
    Json,
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
}

impl FileFormat {
    /// Detect the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    fn parse(self, contents: &str) -> std::result::Result<Value, String> {
        match self {
            Self::Json => serde_json::from_str(contents).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
        }
    }
}

/// Config source that loads a mapping from disk at resolution time.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    prefix: String,
}

impl FileSource {
    /// Create a source for `path`; the format is taken from its extension.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
            prefix: String::new(),
        }
    }

    /// Nest the loaded mapping under a dotted prefix.
    #[must_use]
    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failure(&self, reason: impl Into<String>) -> Error {
        Error::ConfigResolution {
            source_name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn produce(&self, _preset: &ConfigTree, _fixed: &ConfigTree) -> Result<ConfigTree> {
        let format = FileFormat::from_path(&self.path)
            .ok_or_else(|| {
                self.failure("unsupported file extension (expected json, yaml, yml or toml)")
            })?;
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| self.failure(format!("failed to read file: {e}")))?;
        if contents.trim().is_empty() {
            return Ok(ConfigTree::new());
        }
        let value = format
            .parse(&contents)
            .map_err(|e| self.failure(format!("failed to parse {format:?}: {e}")))?;

        match value {
            Value::Object(map) => Ok(ConfigTree::from_map(map)),
            // A YAML document holding only `~` or comments.
            Value::Null => Ok(ConfigTree::new()),
            other => Err(self.failure(format!(
                "expected a mapping at the top level, found {}",
                super::kind_name(&other)
            ))),
        }
    }
}

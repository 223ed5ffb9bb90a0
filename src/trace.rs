//! Stacktrace filtering
//!
//! The engine records an explicit frame stack while a run executes: engine
//! frames for run execution, argument injection and call dispatch, and one
//! user frame per captured function. Filtering drops the engine frames so a
//! failure shows only the user's own call chain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a frame comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// Internal to the engine (injection, run state machine, event bus).
    Engine,
    /// A captured user function.
    User,
}

/// One entry of a run's frame trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    function: String,
    origin: FrameOrigin,
    location: Option<String>,
}

impl StackFrame {
    /// Create a user frame.
    #[must_use]
    pub fn user(function: impl Into<String>, location: Option<String>) -> Self {
        Self {
            function: function.into(),
            origin: FrameOrigin::User,
            location,
        }
    }

    /// Create an engine frame.
    #[must_use]
    pub fn engine(function: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            origin: FrameOrigin::Engine,
            location: Some(location.into()),
        }
    }

    /// Function name.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Frame origin.
    #[must_use]
    pub const fn origin(&self) -> FrameOrigin {
        self.origin
    }

    /// Source location (`file:line`), if known.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Check if the frame belongs to the engine.
    #[must_use]
    pub fn is_engine(&self) -> bool {
        self.origin == FrameOrigin::Engine
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.function, location),
            None => write!(f, "{}", self.function),
        }
    }
}

/// Drop engine frames when `enabled`, keeping user frames in order.
#[must_use]
pub fn filter_frames(raw: &[StackFrame], enabled: bool) -> Vec<StackFrame> {
    if !enabled {
        return raw.to_vec();
    }
    raw.iter().filter(|frame| !frame.is_engine()).cloned().collect()
}

/// Render frames outermost-first, one per line.
#[must_use]
pub fn format_frames(frames: &[StackFrame]) -> String {
    let mut out = String::from("Trace (most recent call last):\n");
    for frame in frames {
        out.push_str("  ");
        out.push_str(&frame.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<StackFrame> {
        vec![
            StackFrame::engine("capstan::run::execute", "src/run/mod.rs:1"),
            StackFrame::user("main", Some("demo.rs:10".to_string())),
            StackFrame::engine("capstan::capture::inject", "src/capture/mod.rs:1"),
            StackFrame::user("train", Some("demo.rs:20".to_string())),
        ]
    }

    #[test]
    fn test_filter_removes_engine_frames() {
        let filtered = filter_frames(&sample(), true);

        let names: Vec<&str> = filtered.iter().map(StackFrame::function).collect();
        assert_eq!(names, vec!["main", "train"]);
    }

    #[test]
    fn test_filter_disabled_is_identity() {
        assert_eq!(filter_frames(&sample(), false), sample());
    }

    #[test]
    fn test_filter_idempotent() {
        let once = filter_frames(&sample(), true);
        assert_eq!(filter_frames(&once, true), once);
    }

    #[test]
    fn test_format_frames() {
        let text = format_frames(&filter_frames(&sample(), true));
        assert!(text.contains("main at demo.rs:10"));
        assert!(text.contains("train at demo.rs:20"));
        assert!(!text.contains("capstan::"));
    }
}

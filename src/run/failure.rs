//! Failure record of a run.

use crate::observer::panic_message;
use crate::trace::{filter_frames, format_frames, StackFrame};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Failure kind used when user code fails with an error that carries no kind.
pub const USER_CODE_ERROR: &str = "UserCodeError";

/// Failure kind used when user code panics.
pub const PANIC: &str = "Panic";

/// User-chosen failure kind.
///
/// Return it (directly or somewhere in the error chain) from a captured
/// function to control the `kind` of the resulting [`Failure`].
///
/// ```rust
/// use capstan::run::UserError;
///
/// let error = UserError::new("ValueError", "learning rate must be positive");
/// assert_eq!(error.kind(), "ValueError");
/// assert_eq!(error.to_string(), "learning rate must be positive");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UserError {
    kind: String,
    message: String,
}

impl UserError {
    /// Create a user error of the given kind.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Failure kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure record of a run.
///
/// Keeps both the raw frame trace and the presented one; filtering never
/// changes `kind`, so programmatic matching sees the same value either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    kind: String,
    message: String,
    chain: Vec<String>,
    trace: Vec<StackFrame>,
    raw_trace: Vec<StackFrame>,
}

impl Failure {
    /// Create a failure, deriving the presented trace from `raw_trace`.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        raw_trace: Vec<StackFrame>,
        filter: bool,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            chain: Vec::new(),
            trace: filter_frames(&raw_trace, filter),
            raw_trace,
        }
    }

    /// Build a failure from an error that propagated out of user code.
    pub(crate) fn from_error(
        error: &anyhow::Error,
        raw_trace: Vec<StackFrame>,
        filter: bool,
    ) -> Self {
        let mut failure = Self::new(classify(error), error.to_string(), raw_trace, filter);
        failure.chain = error.chain().skip(1).map(ToString::to_string).collect();
        failure
    }

    /// Build a failure from a panic payload.
    pub(crate) fn from_panic(
        payload: &(dyn Any + Send),
        raw_trace: Vec<StackFrame>,
        filter: bool,
    ) -> Self {
        Self::new(PANIC, panic_message(payload), raw_trace, filter)
    }

    /// Failure kind (`"ValueError"`, `"MissingParameterError"`, `"Panic"`, ...).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Top-level error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Messages of the underlying causes, outermost first.
    #[must_use]
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Presented trace (engine frames removed unless filtering was disabled).
    #[must_use]
    pub fn trace(&self) -> &[StackFrame] {
        &self.trace
    }

    /// Unfiltered trace.
    #[must_use]
    pub fn raw_trace(&self) -> &[StackFrame] {
        &self.raw_trace
    }

    /// Human-readable rendering of the presented trace.
    #[must_use]
    pub fn format_trace(&self) -> String {
        format!("{}{self}", format_frames(&self.trace))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Walk the error chain for the first cause that carries a kind.
fn classify(error: &anyhow::Error) -> String {
    for cause in error.chain() {
        if let Some(user) = cause.downcast_ref::<UserError>() {
            return user.kind().to_string();
        }
        if let Some(crate_error) = cause.downcast_ref::<crate::Error>() {
            return match crate_error {
                crate::Error::UserCode { failure, .. } => failure.kind().to_string(),
                other => other.kind().to_string(),
            };
        }
    }
    USER_CODE_ERROR.to_string()
}

/// Check if `error` reports an observed interruption.
pub(crate) fn is_interrupt(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<crate::Error>(),
            Some(crate::Error::Interrupted { .. })
        )
    })
}

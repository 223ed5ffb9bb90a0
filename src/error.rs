//! Error types for capstan
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use crate::experiment::RunStatus;
use crate::run::Failure;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// capstan error types
#[derive(Error, Debug)]
pub enum Error {
    /// A config source could not be resolved (malformed file, failing scope, strict merge)
    #[error("Config source `{source_name}` could not be resolved: {reason}")]
    ConfigResolution {
        /// Name of the failing source
        source_name: String,
        /// What went wrong
        reason: String,
    },

    /// A named config was selected but never registered
    #[error("Unknown named config `{0}`")]
    UnknownNamedConfig(String),

    /// A config value could not be read as the requested type
    #[error("Config value at `{path}` has the wrong type: {reason}")]
    ConfigType {
        /// Dotted path of the value
        path: String,
        /// Deserialization failure
        reason: String,
    },

    /// The capture engine could not resolve a required parameter
    #[error("Missing value for parameter `{parameter}` of captured function `{callable}`\nProvide it explicitly, add it to the config, or declare a default")]
    MissingParameter {
        /// Unresolved parameter name
        parameter: String,
        /// Captured function name
        callable: String,
    },

    /// A named argument does not match any declared parameter
    #[error("Captured function `{callable}` got an unexpected argument `{parameter}`")]
    UnexpectedArgument {
        /// Offending argument name
        parameter: String,
        /// Captured function name
        callable: String,
    },

    /// A parameter was supplied both positionally and by name
    #[error("Captured function `{callable}` got multiple values for argument `{parameter}`")]
    DuplicateArgument {
        /// Parameter given twice
        parameter: String,
        /// Captured function name
        callable: String,
    },

    /// More positional arguments than declared parameters
    #[error("Captured function `{callable}` takes {expected} positional arguments but {given} were given")]
    TooManyPositional {
        /// Captured function name
        callable: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied positional count
        given: usize,
    },

    /// A resolved argument could not be read as the requested type
    #[error("Argument `{parameter}` of captured function `{callable}` has the wrong type: {reason}")]
    ArgumentType {
        /// Parameter name
        parameter: String,
        /// Captured function name
        callable: String,
        /// Deserialization failure
        reason: String,
    },

    /// The main function (or a captured call inside it) failed
    #[error("Run {run_id} failed: {failure}")]
    UserCode {
        /// Identity of the failed run
        run_id: String,
        /// Recorded failure, including raw and filtered traces
        failure: Box<Failure>,
    },

    /// The run observed an external interruption signal
    #[error("Run {run_id} was interrupted")]
    Interrupted {
        /// Identity of the interrupted run
        run_id: String,
    },

    /// Illegal run state transition (e.g. leaving a terminal state)
    #[error("Invalid run transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current status
        from: RunStatus,
        /// Requested status
        to: RunStatus,
    },

    /// `Experiment::run` was called before a main function was set
    #[error("Experiment `{0}` has no main function")]
    NoMainFunction(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Failure kind used when this error ends a run.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigResolution { .. } => "ConfigResolutionError",
            Self::UnknownNamedConfig(_) => "UnknownNamedConfigError",
            Self::ConfigType { .. } => "ConfigTypeError",
            Self::MissingParameter { .. } => "MissingParameterError",
            Self::UnexpectedArgument { .. } => "UnexpectedArgumentError",
            Self::DuplicateArgument { .. } => "DuplicateArgumentError",
            Self::TooManyPositional { .. } => "TooManyPositionalError",
            Self::ArgumentType { .. } => "ArgumentTypeError",
            Self::UserCode { .. } => "UserCodeError",
            Self::Interrupted { .. } => "InterruptSignal",
            Self::InvalidTransition { .. } => "InvalidTransitionError",
            Self::NoMainFunction(_) => "NoMainFunctionError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Other(_) => "Error",
        }
    }
}

//! Capture Engine
//!
//! Resolves the arguments of a captured function by name: an explicit
//! argument always wins, then a config value of the same name, then the
//! declared default. A required parameter with none of the three is a
//! `MissingParameter` error.
//!
//! ## Example
//!
//! ```rust
//! use capstan::capture::{inject, Args, ArgSource, Signature};
//! use serde_json::json;
//!
//! let signature = Signature::new("f").param("a").param("foo").param_default("bar", 10);
//! let config = json!({"foo": 42, "bar": "baz"});
//!
//! let args = inject(&signature, &Args::new().arg(1), config.as_object().unwrap())?;
//!
//! assert_eq!(args.value("a"), Some(&json!(1)));
//! assert_eq!(args.value("foo"), Some(&json!(42)));
//! assert_eq!(args.value("bar"), Some(&json!("baz")));
//! assert_eq!(args.source("bar"), Some(ArgSource::Config));
//! # Ok::<(), capstan::Error>(())
//! ```

mod captured;

pub use captured::CapturedFunction;

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared parameter of a captured function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    name: String,
    default: Option<Value>,
}

impl Param {
    /// A parameter without a default.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// A parameter with a default value.
    #[must_use]
    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared default, if any.
    #[must_use]
    pub const fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Check if the parameter has a default.
    #[must_use]
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Name and ordered parameter list of a captured function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    name: String,
    params: Vec<Param>,
}

impl Signature {
    /// Create a signature with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Append a required parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::required(name));
        self
    }

    /// Append a parameter with a default.
    #[must_use]
    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param::with_default(name, default));
        self
    }

    /// Append a prebuilt parameter.
    #[must_use]
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters in order.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// Explicitly supplied arguments for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    named: Map<String, Value>,
}

impl Args {
    /// No explicit arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named argument.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Positional arguments.
    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Named arguments.
    #[must_use]
    pub const fn named(&self) -> &Map<String, Value> {
        &self.named
    }

    /// Check if nothing was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// Where a resolved argument came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgSource {
    /// Supplied by the caller.
    Explicit,
    /// Read from the config subtree.
    Config,
    /// Declared default.
    Default,
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedArg {
    name: String,
    value: Value,
    source: ArgSource,
}

/// Final argument list of one captured call, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArgs {
    callable: String,
    args: Vec<ResolvedArg>,
}

impl ResolvedArgs {
    /// Deserialize the argument `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ArgumentType` if `name` is not a declared parameter or
    /// its value does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.value(name).ok_or_else(|| Error::ArgumentType {
            parameter: name.to_string(),
            callable: self.callable.clone(),
            reason: "not a declared parameter".to_string(),
        })?;
        T::deserialize(value).map_err(|e| Error::ArgumentType {
            parameter: name.to_string(),
            callable: self.callable.clone(),
            reason: e.to_string(),
        })
    }

    /// Raw value of the argument `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// Where the argument `name` came from.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<ArgSource> {
        self.args.iter().find(|a| a.name == name).map(|a| a.source)
    }

    /// Values in declaration order.
    #[must_use]
    pub fn values(&self) -> Vec<&Value> {
        self.args.iter().map(|a| &a.value).collect()
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.args.iter().map(|a| (a.name.as_str(), &a.value))
    }

    /// Name of the function the arguments were resolved for.
    #[must_use]
    pub fn callable(&self) -> &str {
        &self.callable
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Check if the function takes no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Resolve every parameter of `signature`.
///
/// Priority per parameter: explicit argument, then `config` entry of the same
/// name, then declared default.
///
/// # Errors
///
/// - `Error::TooManyPositional` if more positional args than parameters
/// - `Error::UnexpectedArgument` for a named arg with no matching parameter
/// - `Error::DuplicateArgument` if a parameter is given positionally and by name
/// - `Error::MissingParameter` if a required parameter cannot be resolved
pub fn inject(
    signature: &Signature,
    explicit: &Args,
    config: &Map<String, Value>,
) -> Result<ResolvedArgs> {
    let params = signature.params();
    if explicit.positional.len() > params.len() {
        return Err(Error::TooManyPositional {
            callable: signature.name.clone(),
            expected: params.len(),
            given: explicit.positional.len(),
        });
    }
    if let Some(unknown) = explicit.named.keys().find(|k| signature.position(k).is_none()) {
        return Err(Error::UnexpectedArgument {
            parameter: unknown.clone(),
            callable: signature.name.clone(),
        });
    }

    let mut args = Vec::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let positional = explicit.positional.get(index);
        let named = explicit.named.get(&param.name);
        let (value, source) = match (positional, named) {
            (Some(_), Some(_)) => {
                return Err(Error::DuplicateArgument {
                    parameter: param.name.clone(),
                    callable: signature.name.clone(),
                })
            }
            (Some(value), None) | (None, Some(value)) => (value.clone(), ArgSource::Explicit),
            (None, None) => {
                if let Some(value) = config.get(&param.name) {
                    (value.clone(), ArgSource::Config)
                } else if let Some(default) = &param.default {
                    (default.clone(), ArgSource::Default)
                } else {
                    return Err(Error::MissingParameter {
                        parameter: param.name.clone(),
                        callable: signature.name.clone(),
                    });
                }
            }
        };
        args.push(ResolvedArg {
            name: param.name.clone(),
            value,
            source,
        });
    }

    Ok(ResolvedArgs {
        callable: signature.name.clone(),
        args,
    })
}

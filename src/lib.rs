//! # Capstan: Config Injection and Run Lifecycle Engine
//!
//! **Version**: 0.1.0
//!
//! Capstan lets you declare a named, runnable experiment whose behavior is
//! parameterized by a configuration tree. Configuration is collected from
//! ordered declarative sources, injected into captured functions by parameter
//! name, and every execution is modeled as a run whose lifecycle is reported
//! to pluggable observers.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Heijunka**: Deterministic precedence (sources in order < named configs < overrides)
//! - **Poka-Yoke safety**: Run state machine rejects transitions out of terminal states
//! - **Jidoka**: Observer failures are caught and logged, never stopping the run
//! - **Genchi Genbutsu**: Failures keep both the raw and the filtered frame trace
//!
//! ## Example Usage
//!
//! ```rust
//! use capstan::{Args, Experiment, RunOptions, Signature};
//! use capstan::observer::MemoryObserver;
//! use std::sync::Arc;
//!
//! let observer = Arc::new(MemoryObserver::new());
//! let mut ex = Experiment::new("demo");
//! ex.observe(observer.clone());
//! ex.config_scope("defaults", |cfg| {
//!     cfg.set("foo", 42).set("bar", "baz");
//!     Ok(())
//! });
//!
//! let f = ex.capture(
//!     Signature::new("f").param("a").param("foo").param_default("bar", 10),
//!     |_ctx, args| Ok(args.values().into_iter().cloned().collect::<Vec<_>>()),
//! );
//! ex.main(Signature::new("main"), move |ctx, _args| ctx.call_with(&f, &Args::new().arg(1)));
//!
//! let run = ex.run(RunOptions::new())?;
//! assert_eq!(run.result(), Some(&serde_json::json!([1, 42, "baz"])));
//! assert_eq!(observer.event_names(), vec!["started", "completed"]);
//! # Ok::<(), capstan::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod capture;
pub mod config;
pub mod error;
pub mod experiment;
pub mod observer;
pub mod run;
pub mod telemetry;
pub mod trace;

pub use capture::{inject, ArgSource, Args, CapturedFunction, Param, ResolvedArgs, Signature};
pub use config::{ConfigTree, MergePolicy};
pub use error::{Error, Result};
pub use experiment::Experiment;
pub use observer::{EventBus, Observer, RunEvent};
pub use run::{Failure, InterruptHandle, Run, RunContext, RunOptions, UserError};

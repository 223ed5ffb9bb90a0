//! Captured function handle.

use super::{ResolvedArgs, Signature};
use crate::run::RunContext;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;

type CapturedBody<R> = dyn Fn(&mut RunContext<'_>, &ResolvedArgs) -> anyhow::Result<R>;

/// A user function whose parameters are resolved from the run's config.
///
/// Invoke it through [`RunContext::call`] or [`RunContext::call_with`]; the
/// arguments are injected at call time against the frozen config of the run
/// in progress, read from the subtree at [`CapturedFunction::prefix`].
pub struct CapturedFunction<R> {
    signature: Rc<Signature>,
    prefix: Rc<str>,
    body: Rc<CapturedBody<R>>,
    defined_at: &'static Location<'static>,
}

impl<R> CapturedFunction<R> {
    /// Capture `body` under `signature`, reading from the config root.
    #[track_caller]
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(&mut RunContext<'_>, &ResolvedArgs) -> anyhow::Result<R> + 'static,
    {
        Self {
            signature: Rc::new(signature),
            prefix: Rc::from(""),
            body: Rc::new(body),
            defined_at: Location::caller(),
        }
    }

    /// Return a copy that reads its config from the dotted `prefix` subtree.
    #[must_use]
    pub fn with_prefix(&self, prefix: impl AsRef<str>) -> Self {
        Self {
            signature: Rc::clone(&self.signature),
            prefix: Rc::from(prefix.as_ref()),
            body: Rc::clone(&self.body),
            defined_at: self.defined_at,
        }
    }

    /// Declared signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.signature.name()
    }

    /// Config subtree the function reads from (empty = root).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Source location where the function was captured.
    #[must_use]
    pub const fn defined_at(&self) -> &'static Location<'static> {
        self.defined_at
    }

    pub(crate) fn invoke(
        &self,
        context: &mut RunContext<'_>,
        args: &ResolvedArgs,
    ) -> anyhow::Result<R> {
        (self.body)(context, args)
    }
}

impl<R> Clone for CapturedFunction<R> {
    fn clone(&self) -> Self {
        Self {
            signature: Rc::clone(&self.signature),
            prefix: Rc::clone(&self.prefix),
            body: Rc::clone(&self.body),
            defined_at: self.defined_at,
        }
    }
}

impl<R> fmt::Debug for CapturedFunction<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedFunction")
            .field("signature", &self.signature)
            .field("prefix", &self.prefix)
            .field("defined_at", &self.defined_at)
            .finish_non_exhaustive()
    }
}

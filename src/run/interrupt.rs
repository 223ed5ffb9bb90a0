//! Cooperative interruption.
//!
//! A shared flag that may be raised from anywhere (signal handler, another
//! thread); the running experiment observes it at the next captured call or
//! explicit [`RunContext::check_interrupt`](super::RunContext::check_interrupt).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to raise an interruption for a run.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Create a handle with the flag lowered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if the flag is raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Lower the flag so the handle can be reused for another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

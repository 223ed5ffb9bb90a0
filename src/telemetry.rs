//! Tracing subscriber installation.

use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a fmt tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back
/// to `level` (or `info`). Calling this function multiple times is harmless;
/// only the first call has an effect.
pub fn init_tracing(level: Option<Level>) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let default = level.unwrap_or(Level::INFO);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(Some(Level::DEBUG));
        init_tracing(None);
        assert!(TRACING_INIT.get().is_some());
    }
}

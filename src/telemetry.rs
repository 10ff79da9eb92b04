//! Tracing subscriber setup.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a `fmt` subscriber (if one is not already active).
///
/// The filter honours `RUST_LOG` if it is present, otherwise it falls back to
/// `cfg.level`. With `cfg.json` the output is one JSON object per line.
/// Calling this function multiple times is harmless.
pub fn init_tracing(cfg: &LoggingConfig) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let _ = if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    let _ = TRACING_INIT.set(());
}

//! Tracing bootstrap

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber with env-filter support.
///
/// Honors `RUST_LOG`; defaults to `info` for this crate. Safe to call more
/// than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tasquencer=info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

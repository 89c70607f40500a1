//! Tracing setup shared by the library's background workers and the
//! `remap-enginectl` binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber that reads its filter from `RUST_LOG`,
/// defaulting to `info`. Mirrors the teacher's convention of initializing
/// `tracing_subscriber` once at process start rather than per-component.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).try_init();
}

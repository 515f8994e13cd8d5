//! Minimal tracing setup for tools that run before configuration is loaded.

/// Initialize a plain `fmt` subscriber.
///
/// Respects `RUST_LOG`; falls back to `info` when it is unset. Does nothing
/// if a global subscriber is already installed.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "VKMUX_LOG";

/// Initialize structured logging with environment filter.
/// Set VKMUX_LOG=debug (or trace, info, warn, error) for verbosity control.
///
/// The loader lives inside someone else's process, so an already installed
/// global subscriber wins and this call becomes a no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}

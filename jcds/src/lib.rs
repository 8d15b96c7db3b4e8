//! Mirroring of Jamf Pro packages into a local directory.

use tracing_subscriber::EnvFilter;

pub mod digest;
pub mod jamf;
pub mod mirror;
pub mod schedule;
pub mod testing;

/// Set up logging to stderr.
///
/// Log levels are controlled by `RUST_LOG`, defaulting to `info`. Calling this more than once is
/// harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

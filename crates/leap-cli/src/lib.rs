//! Shared plumbing for the LEAP command-line tools.

pub mod paths;

use tracing_subscriber::EnvFilter;

/// Set up tracing from `-v` verbosity, honoring `RUST_LOG` when set.
pub fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

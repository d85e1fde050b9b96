use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the process-wide subscriber: one fmt layer filtered by
/// `RUST_LOG`, with INFO (or DEBUG when `verbose`) as the baseline.
///
/// Returns false when a subscriber was already installed.
pub fn init_logging(verbose: bool) -> bool {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

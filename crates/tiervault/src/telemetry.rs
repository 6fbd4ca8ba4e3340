//! Logging bootstrap.
//!
//! The store only emits `tracing` events; hosts decide where they go.

use tracing_subscriber::EnvFilter;

use crate::error::{HostError, HostResult};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init() -> HostResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| HostError::Telemetry(e.to_string()))
}

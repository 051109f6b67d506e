//! Tracing bootstrap.
//!
//! Work-queue threads, reference-block I/O, and admin-state transitions all
//! emit `tracing` events; this module wires them to a subscriber once per
//! process.

use crate::error::{CoreError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber with the given filter
/// directive (e.g. `"info"` or `"vdo_core=debug"`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| CoreError::InvalidArgument(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| CoreError::InvalidArgument("logging already initialized".into()))
}

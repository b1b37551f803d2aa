//! Logging setup
//!
//! One `tracing` subscriber for the whole process. `RUST_LOG` wins when
//! set; otherwise the filter falls back to the level the embedder passes
//! in (typically the configured link log level). Installed once at
//! startup by whichever binary owns the process.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{LinkError, Result};

/// Install the global tracing subscriber.
///
/// Fails with a config error if the filter does not parse or a
/// subscriber is already installed.
pub fn setup_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| LinkError::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| LinkError::Config(format!("Failed to install subscriber: {}", e)))
}

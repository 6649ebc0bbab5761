//! Logging initialization.
//!
//! Diagnostics go to stderr; stdout is reserved for the progress frame
//! stream so the two never interleave. RUST_LOG overrides the configured
//! filter.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::infrastructure::config::LoggingConfig;

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .context("invalid log filter")?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}

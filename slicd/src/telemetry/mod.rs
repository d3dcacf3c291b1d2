//! # Logging
//!
//! Structured logging through `tracing`. `RUST_LOG` takes precedence over the
//! configured level, so per-module filters such as
//! `RUST_LOG=info,slic::duplex=trace` work without touching the config file.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))
        .context("invalid log filter")?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(config.ansi)
        .with_line_number(config.source_location)
        .with_file(config.source_location);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::info!(level = %config.level, "Logging initialized");
    Ok(())
}

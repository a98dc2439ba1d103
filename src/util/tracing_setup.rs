//! Tracing/logging initialization

use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Build the filter: `RUST_LOG` wins over the configured level
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_level(&config.level),
    }
}

fn parse_level(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {:?}", level))
}

/// Initialize the tracing subscriber based on configuration
///
/// Fails if a global subscriber has already been installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let subscriber = tracing_subscriber::registry().with(build_filter(config)?);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);
            subscriber
                .with(fmt_layer)
                .try_init()
                .context("Tracing subscriber already installed")?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE);
            subscriber
                .with(fmt_layer)
                .try_init()
                .context("Tracing subscriber already installed")?;
        }
    }

    Ok(())
}

//! Logging setup
//!
//! `RUST_LOG` wins over the configured level. Logs go to stderr so reports
//! on stdout stay machine-readable.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stepwright_common::config::LoggingConfig;
use stepwright_common::LogFormat;

pub fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

pub fn init(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter(&config.level)?);
    match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

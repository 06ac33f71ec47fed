//! Tracing subscriber set-up.
//!
//! Logs always go to stderr: in stdio mode stdout carries the protocol.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;
use crate::error::{Error, Result};

/// Install the global subscriber. `RUST_LOG` overrides the level chosen by
/// `debug`.
pub fn init_logging(debug: bool, format: LogFormat) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))
}

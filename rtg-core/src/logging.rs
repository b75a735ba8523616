//! Structured logging with tracing

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// Error returned when the global subscriber cannot be installed
#[derive(Debug, thiserror::Error)]
#[error("Failed to initialize tracing: {0}")]
pub struct TracingInitError(String);

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. `config.format == "json"`
/// selects JSON lines, anything else the human-readable formatter.
/// Subsequent calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingInitError> {
    if INIT.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TracingInitError(e.to_string()))?;

    let result = if config.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init()
    };

    result.map_err(|e| TracingInitError(e.to_string()))?;
    let _ = INIT.set(());
    Ok(())
}

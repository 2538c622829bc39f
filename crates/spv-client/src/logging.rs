//! Tracing subscriber set-up.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::error::LoggingError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `level` when set. `format` is `"json"` for
/// structured output; anything else selects human-readable text.
pub fn init_logging(level: &str, format: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::Filter(e.to_string()))?,
    };

    let result = if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };
    result.map_err(|e| LoggingError::AlreadySet(e.to_string()))
}

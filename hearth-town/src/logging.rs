//! Tracing bootstrap.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{GeneralConfig, LogFormat};
use crate::error::{Result, TownError};

/// Install the global subscriber, writing to stderr. `RUST_LOG` wins over
/// the configured level.
///
/// # Errors
///
/// Returns [`TownError::Logging`] for an unparsable filter or when a global
/// subscriber is already installed.
pub fn init(general: &GeneralConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .map_err(|e| TownError::Logging(e.to_string()))?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match general.log_format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| TownError::Logging(e.to_string()))
}

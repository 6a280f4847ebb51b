/*!
 * Logging functionality for EdgeLink.
 *
 * This module provides tracing setup and span helpers for consistent logging
 * across the EdgeLink crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "edgelink_engine=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    install(filter, true, true)
}

/// Initialize the logging system from the `[logging]` configuration section.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    install(&config.level, config.with_target, config.ansi)
}

fn install(filter: &str, with_target: bool, ansi: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(with_target).with_ansi(ansi))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a span covering all work done on behalf of one field device
///
/// # Arguments
///
/// * `device` - The device name
/// * `protocol` - The protocol tag of the device
pub fn device_span(device: &str, protocol: &str) -> Span {
    tracing::info_span!("device", name = %device, protocol = %protocol)
}

/// Create a new span for an operation
///
/// # Arguments
///
/// * `name` - The name of the operation
/// * `component` - The component performing the operation
pub fn operation_span(name: &str, component: &str) -> Span {
    tracing::info_span!("operation", name = %name, component = %component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // A second global subscriber in the same process is rejected, so only
        // the first call may succeed.
        let first = init();
        let second = init_from_config(&LoggingConfig::default());
        assert!(first.is_err() || second.is_err());
    }

    #[test]
    fn test_spans_without_subscriber() {
        let span = device_span("sensor1", "modbus");
        let _guard = span.enter();
        let span = operation_span("poll", "poller");
        let _guard = span.enter();
    }
}

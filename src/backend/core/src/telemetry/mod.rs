//! Telemetry: structured logging and metrics.
//!
//! ```rust,no_run
//! use bastion_core::telemetry::{self, LoggingConfig};
//!
//! telemetry::init(&LoggingConfig::default()).expect("logging");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};

/// Initialize logging and register metric descriptions. Call once at startup.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(config)?;
    metrics::describe_metrics();
    ::tracing::debug!(format = ?config.format, "Telemetry initialized");
    Ok(())
}

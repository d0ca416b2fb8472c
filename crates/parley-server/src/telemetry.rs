//! Logging setup for Parley Server.
//!
//! Structured events come from `tracing`; this module installs the global
//! subscriber that filters and formats them. Relay metrics are recorded
//! through the `opentelemetry` global meter in `parley_relay::metrics` and
//! are no-ops until an exporter is installed.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info,parley_server=debug,parley_relay=debug";

/// Initialize the global tracing subscriber.
///
/// # Configuration
///
/// - `RUST_LOG`: Log filter (default: [`DEFAULT_FILTER`])
/// - `format`: pretty multi-line output for development or one JSON object
///   per line for log shippers
///
/// Fails if a global subscriber is already installed.
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false);
            registry.with(fmt_layer).try_init()?;
        }
    }

    tracing::info!(format = %format, "Telemetry initialized");

    Ok(())
}

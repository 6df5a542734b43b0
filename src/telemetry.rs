//! Telemetry logic.
//! Support logging and metrics.
use std::time::Duration;

use metrics::Unit;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*};

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
pub fn setup_tracing() -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
}

/// Describe metrics emitted by the authenticator.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "directory_auth_total",
        Unit::Count,
        "Directory authentication calls by strategy and outcome."
    );
    metrics::describe_histogram!(
        "directory_auth_duration_seconds",
        Unit::Seconds,
        "Duration of directory authentication calls."
    );
}

/// Record one finished authentication call.
pub fn record(strategy: &'static str, outcome: &'static str, latency: Duration) {
    let labels = [("strategy", strategy), ("outcome", outcome)];
    metrics::counter!("directory_auth_total", &labels).increment(1);
    metrics::histogram!("directory_auth_duration_seconds", &labels)
        .record(latency.as_secs_f64());
}

//! Failures raised while wiring logging and metrics for an update run.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use prometheus::Error as PrometheusError;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry setup and export failures.
#[derive(Debug)]
pub enum TelemetryError {
    /// Another global subscriber already owns the process.
    LoggingInstalled {
        /// Rejection from `tracing-subscriber`.
        source: TryInitError,
    },
    /// An updater metric could not be built or added to the registry.
    Collector {
        /// Name of the rejected metric.
        metric: &'static str,
        /// Prometheus rejection.
        source: PrometheusError,
    },
    /// The registry could not be rendered as text exposition.
    Exposition {
        /// Prometheus encoder failure.
        source: PrometheusError,
    },
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::LoggingInstalled { .. } => "global log subscriber already installed",
            Self::Collector { .. } => "updater metric rejected by registry",
            Self::Exposition { .. } => "metrics exposition failed",
        })
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::LoggingInstalled { source } => Some(source),
            Self::Collector { source, .. } | Self::Exposition { source } => Some(source),
        }
    }
}

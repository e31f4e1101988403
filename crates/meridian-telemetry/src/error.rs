//! Errors raised while installing telemetry.

use std::net::AddrParseError;
use thiserror::Error;

/// Why a telemetry subsystem could not be installed.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Bad filter directives, or a global subscriber already exists.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// The Prometheus recorder could not be built or installed.
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// The OTLP span exporter could not be built.
    #[error("tracing setup failed: {0}")]
    Tracing(#[from] opentelemetry::trace::TraceError),

    /// The metrics listener address does not parse.
    #[error("invalid metrics listener address '{addr}'")]
    InvalidAddress {
        /// The rejected address.
        addr: String,
        /// Parser error.
        #[source]
        source: AddrParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_invalid_address_keeps_source() {
        let source = "nope".parse::<std::net::SocketAddr>().unwrap_err();
        let err = TelemetryError::InvalidAddress {
            addr: "nope".to_string(),
            source,
        };
        assert_eq!(err.to_string(), "invalid metrics listener address 'nope'");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_logging_display() {
        let err = TelemetryError::Logging("subscriber already set".to_string());
        assert_eq!(err.to_string(), "logging setup failed: subscriber already set");
    }
}

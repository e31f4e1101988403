//! Observability for the Meridian interceptor pipeline.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//! - **Tracing**: OpenTelemetry spans with OTLP export, and W3C trace context
//!   carried in message protocol headers
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `meridian_chains_total` | Counter | `role`, `outcome` |
//! | `meridian_chain_duration_seconds` | Histogram | `role` |
//! | `meridian_faults_total` | Counter | `mode` |
//! | `meridian_unwind_errors_total` | Counter | `interceptor` |
//! | `meridian_paused_chains` | Gauge | - |
//! | `meridian_messages_total` | Counter | `operation`, `role` |
//! | `meridian_message_size_bytes` | Histogram | `operation` |
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder().service_name("greeter").build();
//! let _guard = init_telemetry(config)?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{ServiceIdentity, TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogOutput};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};
pub use tracing::{init_tracing, TracingConfig};

/// Result of installing a telemetry subsystem.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Keeps the span exporter alive.
///
/// Dropping the guard flushes buffered spans and shuts the provider down,
/// so hold it until the process is about to exit.
#[must_use = "dropping the guard shuts span export down"]
pub struct TelemetryGuard {
    spans: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TelemetryGuard {
    pub(crate) const fn new(spans: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { spans }
    }

    /// Whether spans are being exported.
    #[must_use]
    pub const fn exports_spans(&self) -> bool {
        self.spans.is_some()
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("exports_spans", &self.exports_spans())
            .finish()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.spans.take() else {
            return;
        };
        for flushed in provider.force_flush() {
            if let Err(e) = flushed {
                ::tracing::warn!(error = %e, "Span flush failed");
            }
        }
        if let Err(e) = provider.shutdown() {
            ::tracing::warn!(error = %e, "Span exporter shutdown failed");
        }
    }
}

/// Installs logging first, so the other two can log, then metrics and
/// span export.
///
/// # Errors
///
/// Returns the first subsystem's [`TelemetryError`].
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let spans = init_tracing(&config.tracing)?;
    ::tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        environment = %config.service.environment,
        "Telemetry installed"
    );
    Ok(TelemetryGuard::new(spans))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_without_exporter() {
        let guard = TelemetryGuard::new(None);
        assert!(!guard.exports_spans());
        drop(guard);
    }

    #[test]
    fn test_init_with_everything_disabled() {
        let config = TelemetryConfig::builder()
            .logging(LogConfig {
                enabled: false,
                ..LogConfig::default()
            })
            .metrics(MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            })
            .build();

        let guard = init_telemetry(config).unwrap();
        assert!(!guard.exports_spans());
    }
}

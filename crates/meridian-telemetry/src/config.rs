//! Telemetry configuration.
//!
//! A [`TelemetryConfig`] pairs one [`ServiceIdentity`] with the settings of
//! each subsystem. Building it stamps the identity into every subsystem, so
//! logs, metrics and spans always agree on which service emitted them.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

/// Who is emitting telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Service name, the `service` label and `service.name` resource.
    pub name: String,
    /// Service version.
    pub version: String,
    /// Deployment environment.
    pub environment: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "meridian".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Settings for logging, metrics and tracing.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Identity stamped into every subsystem.
    pub service: ServiceIdentity,
    /// Prometheus metrics.
    pub metrics: MetricsConfig,
    /// OTLP tracing.
    pub tracing: TracingConfig,
    /// Structured logging.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Starts a builder from the defaults.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    fn stamp_identity(&mut self) {
        let service = &self.service;
        self.metrics.service_name.clone_from(&service.name);
        self.logging.service_name.clone_from(&service.name);
        self.tracing.service_name.clone_from(&service.name);
        self.tracing.service_version.clone_from(&service.version);
        self.tracing.environment.clone_from(&service.environment);
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service.name = name.into();
        self
    }

    /// Sets the service version. Defaults to this crate's version.
    #[must_use]
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.config.service.version = version.into();
        self
    }

    /// Sets the deployment environment.
    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.service.environment = environment.into();
        self
    }

    /// Replaces the metrics settings.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Replaces the tracing settings.
    #[must_use]
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.config.tracing = tracing;
        self
    }

    /// Replaces the logging settings.
    #[must_use]
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(mut self) -> TelemetryConfig {
        self.config.stamp_identity();
        self.config
    }
}

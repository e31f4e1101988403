//! Span export and trace context propagation.
//!
//! Sets up an OTLP span exporter and carries W3C trace context through a
//! message's [`ProtocolHeaders`], so a chain walking an inbound message can
//! pick up the caller's trace and an outbound chain can forward it.
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_telemetry::tracing::{TracingConfig, init_tracing};
//!
//! let provider = init_tracing(&TracingConfig::default())?;
//! ```

use crate::TelemetryResult;
use meridian_core::ProtocolHeaders;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

/// OTLP span export settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Export spans at all.
    pub enabled: bool,
    /// Collector endpoint, gRPC.
    pub otlp_endpoint: String,
    /// Fraction of root traces kept. Values outside `0.0..1.0` mean all or
    /// nothing.
    pub sample_ratio: f64,
    /// `service.name` resource, set from the service identity.
    pub service_name: String,
    /// `service.version` resource.
    pub service_version: String,
    /// `deployment.environment` resource.
    pub environment: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            sample_ratio: 1.0,
            service_name: "meridian".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

impl TracingConfig {
    fn resource(&self) -> Resource {
        use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};

        Resource::new([
            KeyValue::new(SERVICE_NAME, self.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, self.service_version.clone()),
            KeyValue::new("deployment.environment", self.environment.clone()),
        ])
    }

    fn sampler(&self) -> Sampler {
        match self.sample_ratio {
            r if r >= 1.0 => Sampler::AlwaysOn,
            r if r <= 0.0 => Sampler::AlwaysOff,
            r => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(r))),
        }
    }
}

/// Installs a global OTLP tracer provider and the W3C propagator.
///
/// Returns `None` when tracing is disabled. The provider exports in batches
/// on the Tokio runtime, so call this from inside one.
///
/// # Errors
///
/// Returns [`TelemetryError::Tracing`](crate::TelemetryError::Tracing) if the exporter cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(config.resource())
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());
    ::tracing::debug!(endpoint = %config.otlp_endpoint, "OTLP span export enabled");

    Ok(Some(provider))
}

/// Extracts W3C trace context from message headers.
#[must_use]
pub fn extract_context(headers: &ProtocolHeaders) -> Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// Writes W3C trace context into message headers.
pub fn inject_context(context: &Context, headers: &mut ProtocolHeaders) {
    TraceContextPropagator::new().inject_context(context, &mut HeaderInjector(headers));
}

/// The caller's trace id carried in `headers`, as lowercase hex.
#[must_use]
pub fn remote_trace_id(headers: &ProtocolHeaders) -> Option<String> {
    let context = extract_context(headers);
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// Reads trace context from [`ProtocolHeaders`].
pub struct HeaderExtractor<'a>(pub &'a ProtocolHeaders);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.names().collect()
    }
}

/// Writes trace context into [`ProtocolHeaders`].
pub struct HeaderInjector<'a>(pub &'a mut ProtocolHeaders);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value);
    }
}

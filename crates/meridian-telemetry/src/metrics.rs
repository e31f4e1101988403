//! Prometheus metrics for Meridian.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `meridian_chains_total` | Counter | `role`, `outcome` | Chains that reached a terminal state or paused |
//! | `meridian_chain_duration_seconds` | Histogram | `role` | Wall time of one chain walk |
//! | `meridian_faults_total` | Counter | `mode` | Faults by classification |
//! | `meridian_unwind_errors_total` | Counter | `interceptor` | Fault hooks that themselves failed |
//! | `meridian_paused_chains` | Gauge | - | Chains currently parked awaiting resume |
//! | `meridian_messages_total` | Counter | `operation`, `role` | Messages seen by the telemetry interceptor |
//! | `meridian_message_size_bytes` | Histogram | `operation` | Raw payload size |
//!
//! Recording functions are safe to call before [`init_metrics`]; without an
//! installed recorder they are no-ops.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use meridian_core::{FaultMode, MessageRole};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const CHAINS_TOTAL: &str = "meridian_chains_total";
const CHAIN_DURATION: &str = "meridian_chain_duration_seconds";
const FAULTS_TOTAL: &str = "meridian_faults_total";
const UNWIND_ERRORS_TOTAL: &str = "meridian_unwind_errors_total";
const PAUSED_CHAINS: &str = "meridian_paused_chains";
const MESSAGES_TOTAL: &str = "meridian_messages_total";
const MESSAGE_SIZE: &str = "meridian_message_size_bytes";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090"). When empty the
    /// recorder is installed without an HTTP listener and metrics are only
    /// available through [`render_metrics`].
    pub addr: String,

    /// Service name for metric labels.
    pub service_name: String,

    /// Histogram buckets for chain duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            service_name: "meridian".to_string(),
            // 100µs .. 10s
            duration_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
            ],
        }
    }
}

/// How a chain walk ended, for the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcomeLabel {
    /// Walked to the end.
    Complete,
    /// Parked awaiting resume.
    Paused,
    /// Aborted by a fault.
    Fault,
    /// Aborted by cancellation or timeout.
    Cancel,
}

impl ChainOutcomeLabel {
    /// The label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Paused => "paused",
            Self::Fault => "fault",
            Self::Cancel => "cancel",
        }
    }
}

/// Initializes the Prometheus recorder.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidAddress`] for an unparsable listener
/// address and [`TelemetryError::Metrics`] if a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(CHAIN_DURATION.to_string()),
            &config.duration_buckets,
        )?;

    if !config.addr.is_empty() {
        let addr: SocketAddr = config
            .addr
            .parse()
            .map_err(|source| TelemetryError::InvalidAddress {
                addr: config.addr.clone(),
                source,
            })?;
        builder = builder.with_http_listener(addr);
    }

    let handle = builder.install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        CHAINS_TOTAL,
        "Interceptor chain walks by message role and outcome"
    );
    describe_histogram!(
        CHAIN_DURATION,
        metrics::Unit::Seconds,
        "Wall time of one interceptor chain walk"
    );
    describe_counter!(FAULTS_TOTAL, "Faults raised by interceptors, by fault mode");
    describe_counter!(
        UNWIND_ERRORS_TOTAL,
        "Fault hooks that failed while the chain was unwinding"
    );
    describe_gauge!(
        PAUSED_CHAINS,
        "Interceptor chains currently paused awaiting resume"
    );
    describe_counter!(MESSAGES_TOTAL, "Messages processed, by operation and role");
    describe_histogram!(
        MESSAGE_SIZE,
        metrics::Unit::Bytes,
        "Raw payload size of processed messages"
    );
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records the end of one chain walk.
pub fn record_chain(role: MessageRole, outcome: ChainOutcomeLabel, duration: Duration) {
    counter!(
        CHAINS_TOTAL,
        "role" => role.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(CHAIN_DURATION, "role" => role.as_str()).record(duration.as_secs_f64());
}

/// Records a fault by classification.
pub fn record_fault(mode: FaultMode) {
    counter!(FAULTS_TOTAL, "mode" => mode.as_str()).increment(1);
}

/// Records a fault hook that failed during unwind.
pub fn record_unwind_error(interceptor: &str) {
    counter!(UNWIND_ERRORS_TOTAL, "interceptor" => interceptor.to_string()).increment(1);
}

/// Records a message passing through a chain.
pub fn record_message(operation: &str, role: MessageRole) {
    counter!(
        MESSAGES_TOTAL,
        "operation" => operation.to_string(),
        "role" => role.as_str()
    )
    .increment(1);
}

/// Records the raw payload size of a message.
#[allow(clippy::cast_precision_loss)]
pub fn record_message_size(operation: &str, size: usize) {
    histogram!(MESSAGE_SIZE, "operation" => operation.to_string()).record(size as f64);
}

/// Keeps the paused-chains gauge raised for as long as it lives.
///
/// A paused chain holds one of these in its parked state, so the gauge
/// drops again whether the chain is resumed, cancelled or simply dropped.
#[derive(Debug)]
pub struct PausedGuard {
    _private: (),
}

impl PausedGuard {
    /// Creates a guard and increments the paused-chains gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(PAUSED_CHAINS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for PausedGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PausedGuard {
    fn drop(&mut self) {
        gauge!(PAUSED_CHAINS).decrement(1.0);
    }
}

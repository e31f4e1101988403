//! Structured logging.
//!
//! One `tracing-subscriber` fmt layer, filtered by an [`EnvFilter`] and
//! rendered as JSON lines or as multi-line pretty output.
//!
//! ```rust,ignore
//! use meridian_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(chain_id = %chain, phase = "invoke", "Chain paused");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// How log events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Install a subscriber at all.
    pub enabled: bool,
    /// `EnvFilter` directives, such as `info,meridian_chain=debug`.
    pub filter: String,
    /// Rendering.
    pub output: LogOutput,
    /// Emit span open and close events.
    pub span_events: bool,
    /// Record source file and line.
    pub source_location: bool,
    /// Record the thread id. A resumed chain usually continues on another
    /// thread than the one that paused it.
    pub thread_ids: bool,
    /// Record the module path of each event.
    pub target: bool,
    /// Set from the service identity.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Pretty debug output with spans, locations and thread ids.
    #[must_use]
    pub fn development() -> Self {
        Self {
            filter: "debug".to_string(),
            output: LogOutput::Pretty,
            span_events: true,
            source_location: true,
            thread_ids: true,
            ..Self::production()
        }
    }

    /// JSON at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            filter: "info".to_string(),
            output: LogOutput::Json,
            span_events: false,
            source_location: false,
            thread_ids: false,
            target: true,
            service_name: "meridian".to_string(),
        }
    }

    fn layer(&self, filter: EnvFilter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = tracing_subscriber::fmt::layer()
            .with_span_events(spans)
            .with_file(self.source_location)
            .with_line_number(self.source_location)
            .with_thread_ids(self.thread_ids)
            .with_target(self.target);

        match self.output {
            LogOutput::Json => layer.json().with_filter(filter).boxed(),
            LogOutput::Pretty => layer.pretty().with_filter(filter).boxed(),
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::Logging`] for a bad filter or when a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(config.layer(env_filter(&config.filter)?))
        .try_init()
        .map_err(|e| TelemetryError::Logging(e.to_string()))?;

    tracing::debug!(service = %config.service_name, filter = %config.filter, "Logging initialized");
    Ok(())
}

/// Parses `EnvFilter` directives.
///
/// # Errors
///
/// Returns [`TelemetryError::Logging`] naming the bad directive.
pub fn env_filter(directives: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| TelemetryError::Logging(format!("invalid filter '{directives}': {e}")))
}

//! Telemetry interceptor.
//!
//! Counts messages per operation, records payload sizes and carries W3C
//! trace context across the exchange.
//!
//! # Metrics Emitted
//!
//! - `meridian_messages_total` - Messages by operation and role
//! - `meridian_message_size_bytes` - Raw payload size by operation
//!
//! # Trace Context
//!
//! On inbound messages the caller's trace id is read from the `traceparent`
//! protocol header and stored on the exchange as [`TRACE_ID`], where every
//! later message of the exchange can resolve it contextually. On outbound
//! messages the inbound message's trace context is written into the
//! outbound protocol headers.
//!
//! # Example
//!
//! ```rust
//! use meridian_chain::interceptors::TelemetryInterceptor;
//!
//! let inbound = TelemetryInterceptor::inbound().verbose(true);
//! let outbound = TelemetryInterceptor::outbound();
//! # let _ = (inbound, outbound);
//! ```

use crate::phase::names;
use crate::{Flow, Interceptor, InterceptorContext};
use bytes::Bytes;
use meridian_core::{ContentFormat, Fault, Message, MessageRole};
use meridian_telemetry::metrics::{record_message, record_message_size};
use meridian_telemetry::tracing::{extract_context, inject_context, remote_trace_id};

/// Exchange property holding the caller's trace id as lowercase hex.
pub const TRACE_ID: &str = "trace-id";

/// Telemetry recorded for one message, stored type-keyed on the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTelemetry {
    /// The operation name, or `unknown`.
    pub operation: String,
    /// The message slot.
    pub role: MessageRole,
    /// Raw payload size in bytes, when the payload is bytes or text.
    pub size: Option<usize>,
    /// The caller's trace id, if the exchange carries one.
    pub trace_id: Option<String>,
}

/// Interceptor that emits metrics and propagates trace context.
#[derive(Debug, Clone)]
pub struct TelemetryInterceptor {
    phase: String,
    after: Vec<String>,
    /// Log every message at info level rather than debug.
    verbose: bool,
}

impl TelemetryInterceptor {
    /// Runs in `phase`.
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            after: vec!["message-id".to_string()],
            verbose: false,
        }
    }

    /// For inbound chains, in the `receive` phase after message id
    /// assignment.
    #[must_use]
    pub fn inbound() -> Self {
        Self::new(names::RECEIVE)
    }

    /// For outbound chains, in the `prepare-send` phase.
    #[must_use]
    pub fn outbound() -> Self {
        Self::new(names::PREPARE_SEND)
    }

    /// Logs every message at info level.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

fn payload_size(message: &Message) -> Option<usize> {
    if let Ok(Some(bytes)) = message.content::<Bytes>(ContentFormat::RAW_BYTES) {
        return Some(bytes.len());
    }
    if let Ok(Some(text)) = message.content::<String>(ContentFormat::TEXT) {
        return Some(text.len());
    }
    None
}

impl Interceptor for TelemetryInterceptor {
    fn id(&self) -> &str {
        "telemetry"
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    fn after(&self) -> &[String] {
        &self.after
    }

    fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
        let role = ctx.role();
        let operation = ctx
            .exchange()
            .operation()
            .map_or("unknown", |op| op.name())
            .to_string();
        let size = payload_size(ctx.message()?);

        record_message(&operation, role);
        if let Some(size) = size {
            record_message_size(&operation, size);
        }

        if role.is_outbound() {
            let inbound_context = ctx
                .exchange()
                .in_message()
                .and_then(Message::protocol_headers)
                .filter(|headers| remote_trace_id(headers).is_some())
                .map(extract_context);
            if let Some(context) = inbound_context {
                inject_context(&context, ctx.message_mut()?.protocol_headers_mut());
            }
        } else {
            let remote = ctx.message()?.protocol_headers().and_then(remote_trace_id);
            if let Some(trace_id) = remote {
                ctx.exchange_mut().insert(TRACE_ID, trace_id);
            }
        }

        let trace_id = ctx.contextual_property::<String>(TRACE_ID).cloned();
        let message_id = ctx.message()?.id();
        if self.verbose {
            tracing::info!(
                operation = %operation,
                role = %role,
                message_id = ?message_id,
                trace_id = ?trace_id,
                size = ?size,
                "Message"
            );
        } else {
            tracing::debug!(
                operation = %operation,
                role = %role,
                message_id = ?message_id,
                trace_id = ?trace_id,
                size = ?size,
                "Message"
            );
        }

        ctx.message_mut()?.put(MessageTelemetry {
            operation,
            role,
            size,
            trace_id,
        });
        Ok(Flow::Continue)
    }
}

//! Fault envelope interceptor.
//!
//! Serializes the fault carried by a fault message into a JSON envelope
//! before the message is written out. Runs in the `marshal` phase of the
//! outbound fault chain.
//!
//! # Envelope Format
//!
//! ```json
//! {
//!   "fault": {
//!     "code": "server",
//!     "message": "Human-readable fault message",
//!     "mode": "runtime_fault"
//!   },
//!   "message_id": "the id of the message that faulted"
//! }
//! ```
//!
//! Server-side runtime faults are masked unless internal errors are exposed:
//! their message is replaced and their detail dropped. Client faults and
//! application faults always go out as raised.
//!
//! # Example
//!
//! ```rust
//! use meridian_chain::interceptors::FaultEnvelopeInterceptor;
//!
//! // Default configuration
//! let envelope = FaultEnvelopeInterceptor::new();
//!
//! // With internal fault details (development only)
//! let envelope = FaultEnvelopeInterceptor::new().expose_internal_errors(true);
//! # let _ = envelope;
//! ```

use crate::observer::CORRELATION_ID;
use crate::phase::names;
use crate::{Flow, Interceptor, InterceptorContext};
use meridian_core::{ContentFormat, Fault, FaultCode};

/// Protocol header naming the envelope's media type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Interceptor that writes the fault of a fault message as JSON text.
#[derive(Debug, Clone)]
pub struct FaultEnvelopeInterceptor {
    /// Whether to expose internal fault details (development mode).
    expose_internal_errors: bool,
    /// Replacement message for masked faults.
    internal_error_message: String,
}

impl Default for FaultEnvelopeInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultEnvelopeInterceptor {
    /// Creates the interceptor with internal faults masked.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expose_internal_errors: false,
            internal_error_message: "An internal error occurred".to_string(),
        }
    }

    /// Sets whether to expose internal fault details.
    ///
    /// **Warning**: Only enable this in development environments.
    #[must_use]
    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// Sets the replacement message for masked faults.
    #[must_use]
    pub fn internal_error_message(mut self, message: &str) -> Self {
        self.internal_error_message = message.to_string();
        self
    }

    fn masks(&self, fault: &Fault) -> bool {
        !self.expose_internal_errors
            && fault.code() == FaultCode::Server
            && !fault.mode().is_some_and(|mode| mode.is_application())
    }
}

impl Interceptor for FaultEnvelopeInterceptor {
    fn id(&self) -> &str {
        "fault-envelope"
    }

    fn phase(&self) -> &str {
        names::MARSHAL
    }

    fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
        let role = ctx.role();
        let Some(mut fault) = ctx.message()?.content::<Fault>(ContentFormat::FAULT)?.cloned() else {
            tracing::debug!(role = %role, "No fault content to marshal");
            return Ok(Flow::Continue);
        };

        if fault.mode().is_none() {
            if let Some(mode) = ctx.exchange().fault_mode(role) {
                fault = fault.with_mode(mode);
            }
        }
        if self.masks(&fault) {
            fault.set_message(self.internal_error_message.clone());
            *fault.detail_mut() = None;
        }

        let message = ctx.message()?;
        let correlation = message.get_string(CORRELATION_ID);
        let envelope = fault.to_envelope(correlation);
        let body = serde_json::to_string(&envelope).map_err(Fault::from_error)?;

        let message = ctx.message_mut()?;
        message.set_content(ContentFormat::TEXT, body);
        message
            .protocol_headers_mut()
            .insert(CONTENT_TYPE_HEADER, "application/json");
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainOutcome, InterceptorChain, PhaseRegistry};
    use meridian_core::fixtures::request_exchange;
    use meridian_core::{Exchange, FaultMode, Message, MessageRole};

    fn run(interceptor: FaultEnvelopeInterceptor, fault: Fault) -> serde_json::Value {
        let mut exchange: Exchange = request_exchange("hi");
        let mut message = Message::with_content(ContentFormat::FAULT, fault.clone());
        if let Some(mode) = fault.mode() {
            message.put(mode);
        }
        message.insert(CORRELATION_ID, "m-1".to_string());
        exchange.set_out_fault_message(message);

        let mut chain = InterceptorChain::new(PhaseRegistry::outbound().order().unwrap());
        chain.add(interceptor).unwrap();
        let exchange = match chain.do_intercept(exchange, MessageRole::OutFault) {
            ChainOutcome::Complete(exchange) => exchange,
            other => panic!("unexpected outcome {other:?}"),
        };
        let message = exchange.out_fault_message().unwrap();
        assert_eq!(
            message.protocol_headers().unwrap().get(CONTENT_TYPE_HEADER),
            Some("application/json")
        );
        let text = message.content::<String>(ContentFormat::TEXT).unwrap().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_default_configuration() {
        let interceptor = FaultEnvelopeInterceptor::default();
        assert!(!interceptor.expose_internal_errors);
        assert_eq!(interceptor.id(), "fault-envelope");
        assert_eq!(interceptor.phase(), names::MARSHAL);
    }

    #[test]
    fn test_runtime_fault_masked() {
        let body = run(
            FaultEnvelopeInterceptor::new(),
            Fault::server("db password rejected").with_detail(serde_json::json!({"dsn": "x"})),
        );

        assert_eq!(body["fault"]["message"], "An internal error occurred");
        assert_eq!(body["fault"]["code"], "server");
        assert_eq!(body["fault"]["mode"], "runtime_fault");
        assert!(body["fault"].get("detail").is_none());
        assert_eq!(body["message_id"], "m-1");
    }

    #[test]
    fn test_client_fault_passes_through() {
        let body = run(
            FaultEnvelopeInterceptor::new(),
            Fault::client("missing element").with_detail(serde_json::json!({"field": "name"})),
        );

        assert_eq!(body["fault"]["message"], "missing element");
        assert_eq!(body["fault"]["code"], "client");
        assert_eq!(body["fault"]["detail"]["field"], "name");
    }

    #[test]
    fn test_application_fault_passes_through() {
        let body = run(
            FaultEnvelopeInterceptor::new(),
            Fault::server("no such greeting").with_mode(FaultMode::CheckedApplicationFault),
        );

        assert_eq!(body["fault"]["message"], "no such greeting");
        assert_eq!(body["fault"]["mode"], "checked_application_fault");
    }

    #[test]
    fn test_expose_internal_errors() {
        let body = run(
            FaultEnvelopeInterceptor::new()
                .expose_internal_errors(true)
                .internal_error_message("unused"),
            Fault::server("db password rejected"),
        );
        assert_eq!(body["fault"]["message"], "db password rejected");
    }

    #[test]
    fn test_custom_internal_message() {
        let body = run(
            FaultEnvelopeInterceptor::new().internal_error_message("Try again later"),
            Fault::server("boom"),
        );
        assert_eq!(body["fault"]["message"], "Try again later");
    }
}

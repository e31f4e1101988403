//! Message id assignment.
//!
//! Every message that passes this interceptor leaves it with an id:
//!
//! 1. **`message-id` header**: reused if trusted and a valid UUID
//! 2. **Generated UUID v7**: otherwise
//!
//! On outbound messages the id of the inbound message is also recorded as
//! [`CORRELATION_ID`] and the message's own id is written to the
//! `message-id` header, so the peer can correlate the reply.

use crate::observer::CORRELATION_ID;
use crate::phase::names;
use crate::{Flow, Interceptor, InterceptorContext};
use meridian_core::{Fault, MessageId, MessageRole};

/// Protocol header carrying a message id.
pub const MESSAGE_ID_HEADER: &str = "message-id";

/// Interceptor that gives every message an id.
///
/// # Example
///
/// ```
/// use meridian_chain::interceptors::MessageIdInterceptor;
/// use meridian_chain::Interceptor;
///
/// let inbound = MessageIdInterceptor::inbound();
/// assert_eq!(inbound.phase(), "receive");
/// ```
#[derive(Debug, Clone)]
pub struct MessageIdInterceptor {
    phase: String,
    /// Whether an incoming `message-id` header may be reused.
    ///
    /// Leave this off for traffic from outside the trust boundary.
    trust_incoming: bool,
}

impl MessageIdInterceptor {
    /// Runs in `phase`, never trusting incoming ids.
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            trust_incoming: false,
        }
    }

    /// For inbound chains, in the `receive` phase.
    #[must_use]
    pub fn inbound() -> Self {
        Self::new(names::RECEIVE)
    }

    /// For outbound chains, in the `setup` phase.
    #[must_use]
    pub fn outbound() -> Self {
        Self::new(names::SETUP)
    }

    /// Reuses valid incoming `message-id` headers.
    #[must_use]
    pub fn trust_incoming(mut self, trust: bool) -> Self {
        self.trust_incoming = trust;
        self
    }

    fn incoming_id(&self, ctx: &InterceptorContext<'_>) -> Option<MessageId> {
        if !self.trust_incoming {
            return None;
        }
        ctx.message()
            .ok()?
            .protocol_headers()?
            .get(MESSAGE_ID_HEADER)
            .and_then(|value| value.parse().ok())
    }
}

impl Interceptor for MessageIdInterceptor {
    fn id(&self) -> &str {
        "message-id"
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
        let incoming = self.incoming_id(ctx);
        let correlation = match ctx.role() {
            MessageRole::Out | MessageRole::OutFault => ctx
                .exchange()
                .in_message()
                .and_then(|m| m.id())
                .map(|id| id.to_string()),
            MessageRole::In | MessageRole::InFault => None,
        };
        let outbound = ctx.role().is_outbound();

        let message = ctx.message_mut()?;
        if message.id().is_none() {
            if let Some(id) = incoming {
                message.set_id(id)?;
            }
        }
        let id = message.ensure_id();

        if let Some(correlation) = correlation {
            if !message.contains_key(CORRELATION_ID) {
                message.insert(CORRELATION_ID, correlation);
            }
        }
        if outbound {
            message
                .protocol_headers_mut()
                .insert(MESSAGE_ID_HEADER, id.to_string());
        }

        tracing::trace!(message_id = %id, "Message id assigned");
        Ok(Flow::Continue)
    }
}

//! Structured message logging.

use crate::phase::names;
use crate::{Flow, Interceptor, InterceptorContext};
use meridian_core::Fault;

/// Logs a summary of every message it sees, and any fault or cancellation
/// that unwinds back through it.
///
/// Entries go to the `meridian_chain::interceptors::logging` target at debug
/// level, or info when verbose.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    phase: String,
    verbose: bool,
}

impl LoggingInterceptor {
    /// Runs in `phase`.
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            verbose: false,
        }
    }

    /// For inbound chains, in the `receive` phase.
    #[must_use]
    pub fn inbound() -> Self {
        Self::new(names::RECEIVE)
    }

    /// For outbound chains, in the `send` phase.
    #[must_use]
    pub fn outbound() -> Self {
        Self::new(names::SEND)
    }

    /// Logs at info level.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Interceptor for LoggingInterceptor {
    fn id(&self) -> &str {
        "logging"
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
        let message = ctx.message()?;
        let formats: Vec<&str> = message
            .content_formats()
            .iter()
            .map(|format| format.name())
            .collect();
        let attachments = message.attachments().len();
        let message_id = message.id();
        let exchange = ctx.exchange();

        if self.verbose {
            tracing::info!(
                exchange_id = %exchange.id(),
                message_id = ?message_id,
                role = %ctx.role(),
                formats = ?formats,
                attachments,
                one_way = exchange.is_one_way(),
                "Processing message"
            );
        } else {
            tracing::debug!(
                exchange_id = %exchange.id(),
                message_id = ?message_id,
                role = %ctx.role(),
                formats = ?formats,
                attachments,
                one_way = exchange.is_one_way(),
                "Processing message"
            );
        }
        Ok(Flow::Continue)
    }

    fn handle_fault(&self, ctx: &mut InterceptorContext<'_>, fault: &mut Fault) -> Result<(), Fault> {
        tracing::debug!(
            exchange_id = %ctx.exchange().id(),
            role = %ctx.role(),
            fault = %fault,
            "Message processing faulted"
        );
        Ok(())
    }

    fn handle_cancel(&self, ctx: &mut InterceptorContext<'_>) {
        tracing::debug!(
            exchange_id = %ctx.exchange().id(),
            role = %ctx.role(),
            "Message processing cancelled"
        );
    }
}

//! The interceptor trait and closure adapter.
//!
//! An interceptor is one step of a chain. It names the phase it belongs to,
//! may ask to sit before or after other interceptors of the same phase, and
//! handles the message in three situations:
//!
//! - [`handle_message`](Interceptor::handle_message): the forward walk
//! - [`handle_fault`](Interceptor::handle_fault): a later interceptor raised
//!   a fault and the chain is unwinding
//! - [`handle_cancel`](Interceptor::handle_cancel): the chain was cancelled
//!   or timed out while paused
//!
//! # Example
//!
//! ```
//! use meridian_chain::{Flow, FnInterceptor, InterceptorContext};
//! use meridian_core::Fault;
//!
//! let audit = FnInterceptor::new("audit", "pre-invoke", |ctx: &mut InterceptorContext<'_>| {
//!     let message = ctx.message_mut()?;
//!     message.insert("audited", true);
//!     Ok(Flow::Continue)
//! })
//! .after("schema-validation");
//! # let _ = audit;
//! ```

use crate::InterceptorContext;
use meridian_core::Fault;
use std::fmt;
use std::sync::Arc;

/// What the chain does after an interceptor returns successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Move on to the next interceptor.
    Continue,
    /// Park the chain. The walk resumes after this interceptor once the
    /// [`Continuation`](crate::Continuation) taken from the context is
    /// resumed.
    Pause,
}

/// A unit of message processing within a chain.
pub trait Interceptor: Send + Sync + 'static {
    /// Identifier, unique within a phase.
    fn id(&self) -> &str;

    /// The phase this interceptor runs in.
    fn phase(&self) -> &str;

    /// Ids of same-phase interceptors this one must run before.
    fn before(&self) -> &[String] {
        &[]
    }

    /// Ids of same-phase interceptors this one must run after.
    fn after(&self) -> &[String] {
        &[]
    }

    /// Processes the message on the forward walk.
    ///
    /// # Errors
    ///
    /// A returned [`Fault`] aborts the walk and unwinds the interceptors that
    /// already ran.
    fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault>;

    /// Compensates for this interceptor's work after a later one faulted.
    ///
    /// The fault may be enriched in place. Errors are logged and otherwise
    /// ignored; they never stop the unwind.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] if compensation itself failed.
    fn handle_fault(&self, _ctx: &mut InterceptorContext<'_>, _fault: &mut Fault) -> Result<(), Fault> {
        Ok(())
    }

    /// Releases anything held for a chain that was cancelled while paused.
    fn handle_cancel(&self, _ctx: &mut InterceptorContext<'_>) {}
}

impl fmt::Debug for dyn Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("id", &self.id())
            .field("phase", &self.phase())
            .finish()
    }
}

/// A shared interceptor as stored by chains.
pub type SharedInterceptor = Arc<dyn Interceptor>;

/// An interceptor built from a closure.
///
/// Handy for tests and one-off hooks. The closure only covers
/// [`Interceptor::handle_message`]; fault and cancel hooks are no-ops.
pub struct FnInterceptor<F> {
    id: String,
    phase: String,
    before: Vec<String>,
    after: Vec<String>,
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut InterceptorContext<'_>) -> Result<Flow, Fault> + Send + Sync + 'static,
{
    /// Creates an interceptor named `id` in `phase`.
    pub fn new(id: impl Into<String>, phase: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            before: Vec::new(),
            after: Vec::new(),
            func,
        }
    }

    /// Requires this interceptor to run before `id`.
    #[must_use]
    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.before.push(id.into());
        self
    }

    /// Requires this interceptor to run after `id`.
    #[must_use]
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.after.push(id.into());
        self
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut InterceptorContext<'_>) -> Result<Flow, Fault> + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    fn before(&self) -> &[String] {
        &self.before
    }

    fn after(&self) -> &[String] {
        &self.after
    }

    fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
        (self.func)(ctx)
    }
}

impl<F> fmt::Debug for FnInterceptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

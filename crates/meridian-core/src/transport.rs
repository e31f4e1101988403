//! Transport-facing interfaces.
//!
//! The core never implements a transport. It only holds weak references to
//! the endpoints an exchange travels through, and resolves outbound conduits
//! through a [`ConduitSelector`] found in the exchange's property bag.

use crate::exchange::Exchange;
use crate::fault::Fault;
use crate::message::Message;
use std::sync::Arc;

/// The receiving end of a transport.
pub trait Destination: Send + Sync + 'static {
    /// The address this destination listens on.
    fn address(&self) -> &str;
}

/// The sending end of a transport.
pub trait Conduit: Send + Sync + 'static {
    /// The address this conduit sends to.
    fn target(&self) -> &str;

    /// Prepares the transport to carry `message`, e.g. by opening a
    /// connection and exposing an output stream as message content.
    fn prepare(&self, message: &mut Message) -> Result<(), Fault>;

    /// Flushes and releases transport state held for `message`.
    fn close(&self, _message: &mut Message) -> Result<(), Fault> {
        Ok(())
    }
}

/// Picks the conduit an outbound exchange should use.
///
/// Selectors own the conduits they hand out; exchanges only keep weak
/// references to them.
pub trait ConduitSelector: Send + Sync + 'static {
    /// Chooses a conduit for `exchange`, or `None` if none applies.
    fn select(&self, exchange: &Exchange) -> Option<Arc<dyn Conduit>>;
}

/// A selector that always hands out the same conduit.
pub struct FixedConduitSelector {
    conduit: Arc<dyn Conduit>,
}

impl FixedConduitSelector {
    /// Creates a selector for `conduit`.
    #[must_use]
    pub fn new(conduit: Arc<dyn Conduit>) -> Self {
        Self { conduit }
    }
}

impl ConduitSelector for FixedConduitSelector {
    fn select(&self, _exchange: &Exchange) -> Option<Arc<dyn Conduit>> {
        Some(Arc::clone(&self.conduit))
    }
}

impl std::fmt::Debug for FixedConduitSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedConduitSelector")
            .field("target", &self.conduit.target())
            .finish()
    }
}

//! Hooks for faults that end a chain.
//!
//! Two seams exist. A [`FaultListener`] found on the message context is told
//! about every fault before the unwind and decides whether the chain also
//! logs it. A [`FaultObserver`] set on the chain runs after the unwind and
//! typically produces the fault response; [`FaultChainObserver`] does this
//! by running a dedicated fault chain over a new fault message.

use crate::chain::InterceptorChain;
use crate::phase::PhaseOrder;
use crate::{ChainError, Interceptor, SharedInterceptor};
use meridian_core::{ContentFormat, Exchange, Fault, Message, MessageRole};
use std::sync::Arc;

/// Property holding the id of the message whose processing faulted, as a
/// string, on the fault message built by [`FaultChainObserver`].
pub const CORRELATION_ID: &str = "correlation-id";

/// Told about each fault before the chain unwinds.
///
/// Stored as a type-keyed `Arc<dyn FaultListener>` anywhere on the message
/// context: message, exchange, operation, endpoint or service.
pub trait FaultListener: Send + Sync + 'static {
    /// Returns `true` to let the chain log the fault as well.
    fn fault_occurred(&self, fault: &Fault, exchange: &Exchange, role: MessageRole) -> bool;
}

/// Runs after a chain has unwound from a fault.
pub trait FaultObserver: Send + Sync + 'static {
    /// Handles the fault. `role` is the slot of the chain that faulted.
    fn on_fault(&self, exchange: &mut Exchange, role: MessageRole, fault: &Fault);
}

/// Builds a fault message and runs a fault chain over it.
///
/// The fault message carries the fault as [`ContentFormat::FAULT`], the
/// fault's [`FaultMode`](meridian_core::FaultMode) when one was set, and
/// [`CORRELATION_ID`]. It is placed in the target slot, usually
/// [`MessageRole::OutFault`]. One-way exchanges get no outbound fault
/// message, and faults raised while processing a fault message are not
/// dispatched again.
pub struct FaultChainObserver {
    order: Arc<PhaseOrder>,
    target: MessageRole,
    interceptors: Vec<SharedInterceptor>,
}

impl FaultChainObserver {
    /// Creates an observer that fills `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] if an interceptor's phase is not
    /// in `order`.
    pub fn new<I>(order: Arc<PhaseOrder>, target: MessageRole, interceptors: I) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = SharedInterceptor>,
    {
        let interceptors: Vec<_> = interceptors.into_iter().collect();
        if let Some(bad) = interceptors.iter().find(|i| !order.contains(i.phase())) {
            return Err(ChainError::unknown_phase(bad.phase(), Some(bad.id())));
        }
        Ok(Self {
            order,
            target,
            interceptors,
        })
    }

    /// An observer that fills the outbound fault slot.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] for an unknown phase.
    pub fn outbound<I>(order: Arc<PhaseOrder>, interceptors: I) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = SharedInterceptor>,
    {
        Self::new(order, MessageRole::OutFault, interceptors)
    }

    /// Adds an interceptor to the fault chain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] for an unknown phase.
    pub fn with_interceptor<I: Interceptor>(mut self, interceptor: I) -> Result<Self, ChainError> {
        if !self.order.contains(interceptor.phase()) {
            return Err(ChainError::unknown_phase(
                interceptor.phase(),
                Some(interceptor.id()),
            ));
        }
        self.interceptors.push(Arc::new(interceptor));
        Ok(self)
    }

    /// The slot this observer fills.
    #[must_use]
    pub const fn target(&self) -> MessageRole {
        self.target
    }

    fn fault_message(exchange: &Exchange, role: MessageRole, fault: &Fault) -> Message {
        let mut message = Message::with_content(ContentFormat::FAULT, fault.clone());
        if let Some(mode) = fault.mode() {
            message.put(mode);
        }
        if let Some(id) = exchange.message(role).and_then(Message::id) {
            message.insert(CORRELATION_ID, id.to_string());
        }
        message
    }
}

impl FaultObserver for FaultChainObserver {
    fn on_fault(&self, exchange: &mut Exchange, role: MessageRole, fault: &Fault) {
        if role.is_fault() {
            tracing::warn!(
                exchange_id = %exchange.id(),
                role = %role,
                "Fault while processing a fault message; not dispatching again"
            );
            return;
        }
        if self.target == MessageRole::OutFault && exchange.is_one_way() {
            tracing::debug!(exchange_id = %exchange.id(), "One-way exchange; no fault response");
            return;
        }

        let message = Self::fault_message(exchange, role, fault);
        exchange.set_message(self.target, message);

        let mut chain = InterceptorChain::new(Arc::clone(&self.order));
        if let Err(error) = chain.add_all(self.interceptors.iter().cloned()) {
            tracing::error!(error = %error, "Could not assemble fault chain");
            return;
        }
        if let Err(nested) = chain.run_in_place(exchange, self.target) {
            tracing::error!(
                exchange_id = %exchange.id(),
                original = %fault,
                fault = %nested,
                "Fault chain failed"
            );
        }
    }
}

impl std::fmt::Debug for FaultChainObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultChainObserver")
            .field("target", &self.target)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

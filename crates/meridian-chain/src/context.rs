//! The view an interceptor gets of the chain it is running in.

use crate::chain::{Halt, InterceptorChain};
use crate::continuation::{Continuation, Shared};
use crate::{ChainError, Interceptor, PhaseOrder, SharedInterceptor};
use meridian_core::{ChainId, Exchange, Fault, Message, MessageRole};
use std::any::Any;
use std::sync::Arc;

/// Context handed to each interceptor hook.
///
/// Gives access to the exchange and the message being processed, resolves
/// properties through the message, exchange, operation, endpoint and service
/// layers, and lets the interceptor add interceptors to the running chain,
/// run the rest of the chain itself with [`proceed`](Self::proceed), or take
/// a [`Continuation`] before pausing.
pub struct InterceptorContext<'a> {
    exchange: &'a mut Exchange,
    role: MessageRole,
    order: &'a PhaseOrder,
    shared: &'a Arc<Shared>,
    interceptor_id: &'a str,
    inserted: Vec<SharedInterceptor>,
    accepts_insertions: bool,
    chain: Option<&'a mut InterceptorChain>,
    proceeded: bool,
    downstream: Option<Halt>,
}

/// What a `handle_message` call left behind for the walk.
pub(crate) struct StepReport {
    pub(crate) inserted: Vec<SharedInterceptor>,
    pub(crate) proceeded: bool,
    pub(crate) downstream: Option<Halt>,
}

impl<'a> InterceptorContext<'a> {
    pub(crate) fn new(
        exchange: &'a mut Exchange,
        role: MessageRole,
        order: &'a PhaseOrder,
        shared: &'a Arc<Shared>,
        interceptor_id: &'a str,
    ) -> Self {
        Self {
            exchange,
            role,
            order,
            shared,
            interceptor_id,
            inserted: Vec::new(),
            accepts_insertions: true,
            chain: None,
            proceeded: false,
            downstream: None,
        }
    }

    /// Lets the hook drive the rest of `chain` through [`proceed`](Self::proceed).
    pub(crate) fn driving(mut self, chain: &'a mut InterceptorChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// A context for fault and cancel hooks, where insertion has no effect.
    pub(crate) fn unwinding(
        exchange: &'a mut Exchange,
        role: MessageRole,
        order: &'a PhaseOrder,
        shared: &'a Arc<Shared>,
        interceptor_id: &'a str,
    ) -> Self {
        Self {
            accepts_insertions: false,
            ..Self::new(exchange, role, order, shared, interceptor_id)
        }
    }

    pub(crate) fn finish(self) -> StepReport {
        StepReport {
            inserted: self.inserted,
            proceeded: self.proceeded,
            downstream: self.downstream,
        }
    }

    /// The exchange being processed.
    #[must_use]
    pub fn exchange(&self) -> &Exchange {
        self.exchange
    }

    /// Mutable access to the exchange.
    pub fn exchange_mut(&mut self) -> &mut Exchange {
        self.exchange
    }

    /// Which message slot this chain is processing.
    #[must_use]
    pub const fn role(&self) -> MessageRole {
        self.role
    }

    /// The message being processed.
    ///
    /// # Errors
    ///
    /// Returns a server fault if an earlier interceptor took the message out
    /// of its slot.
    pub fn message(&self) -> Result<&Message, Fault> {
        let id = self.exchange.id();
        self.exchange
            .message(self.role)
            .ok_or_else(|| missing_message(self.role, id))
    }

    /// Mutable access to the message being processed.
    ///
    /// # Errors
    ///
    /// Returns a server fault if the message slot is empty.
    pub fn message_mut(&mut self) -> Result<&mut Message, Fault> {
        let id = self.exchange.id();
        self.exchange
            .message_mut(self.role)
            .ok_or_else(|| missing_message(self.role, id))
    }

    /// Resolves `key` through the message, exchange, operation, endpoint and
    /// service, in that order.
    #[must_use]
    pub fn contextual_property<T: Any>(&self, key: &str) -> Option<&T> {
        self.exchange.contextual_property(self.role, key)
    }

    /// Resolves `key` as a flag through the same layers.
    #[must_use]
    pub fn contextual_is_true(&self, key: &str) -> bool {
        self.exchange.contextual_is_true(self.role, key)
    }

    /// Resolves a type-keyed property through the same layers.
    #[must_use]
    pub fn contextual_typed<T: Any>(&self) -> Option<&T> {
        self.exchange.contextual_typed(self.role)
    }

    /// Id of the running chain.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.shared.chain_id()
    }

    /// Id of the interceptor this context was handed to.
    #[must_use]
    pub fn interceptor_id(&self) -> &str {
        self.interceptor_id
    }

    /// The phase order of the running chain.
    #[must_use]
    pub fn phases(&self) -> &PhaseOrder {
        self.order
    }

    /// Adds an interceptor to the running chain.
    ///
    /// It is placed like any other interceptor once the current hook
    /// returns. If that position is at or behind the interceptor currently
    /// running it will not run during this walk. Insertions made from fault
    /// or cancel hooks are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] if the chain has no such phase.
    pub fn insert<I: Interceptor>(&mut self, interceptor: I) -> Result<(), ChainError> {
        self.insert_shared(Arc::new(interceptor))
    }

    /// Adds an already shared interceptor to the running chain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] if the chain has no such phase.
    pub fn insert_shared(&mut self, interceptor: SharedInterceptor) -> Result<(), ChainError> {
        if !self.order.contains(interceptor.phase()) {
            return Err(ChainError::unknown_phase(
                interceptor.phase(),
                Some(interceptor.id()),
            ));
        }
        if self.accepts_insertions {
            self.inserted.push(interceptor);
        } else {
            tracing::debug!(
                interceptor = interceptor.id(),
                "Ignoring insertion made while unwinding"
            );
        }
        Ok(())
    }

    /// Runs every interceptor after this one now, then returns control here.
    ///
    /// This wraps the rest of the walk: code after the call sees the
    /// message as the downstream interceptors left it. Each of them still
    /// runs once, and the walk does not visit them again after this hook
    /// returns. Interceptors inserted so far are placed first. The rest of
    /// the walk cannot pause; a [`Flow::Pause`](crate::Flow::Pause) from a
    /// downstream interceptor is treated as continue.
    ///
    /// A downstream fault is returned here without unwinding. The chain
    /// unwinds with it once this hook returns, even if the hook returns
    /// `Ok`, so returning a different fault only replaces it. Pausing from
    /// this hook after proceeding has no effect.
    ///
    /// # Errors
    ///
    /// Returns the downstream fault, a server fault if the chain was
    /// cancelled meanwhile, or a server fault when called twice or from a
    /// fault or cancel hook.
    pub fn proceed(&mut self) -> Result<(), Fault> {
        if self.proceeded {
            return Err(Fault::server(format!(
                "{} already ran the rest of the chain",
                self.interceptor_id
            )));
        }
        let Some(chain) = self.chain.as_deref_mut() else {
            return Err(Fault::server("the rest of the chain can only run from handle_message"));
        };
        self.proceeded = true;
        let inserted = std::mem::take(&mut self.inserted);
        let halt = chain.proceed_from(self.exchange, inserted);

        let result = match &halt {
            None | Some(Halt::Paused) => Ok(()),
            Some(Halt::Fault(fault)) => Err(fault.clone()),
            Some(Halt::Cancel(reason)) => Err(Fault::server(format!("chain cancelled ({reason})"))),
        };
        self.downstream = halt;
        result
    }

    /// A handle for resuming or cancelling this chain once it pauses.
    ///
    /// Take it before returning [`Flow::Pause`](crate::Flow::Pause) and hand
    /// it to whatever will complete the pending work.
    #[must_use]
    pub fn continuation(&self) -> Continuation {
        Continuation::current(self.shared)
    }
}

fn missing_message(role: MessageRole, exchange: meridian_core::ExchangeId) -> Fault {
    Fault::server(format!("exchange {exchange} has no {role} message"))
}

impl std::fmt::Debug for InterceptorContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorContext")
            .field("exchange", &self.exchange.id())
            .field("role", &self.role)
            .field("interceptor", &self.interceptor_id)
            .field("inserted", &self.inserted.len())
            .finish_non_exhaustive()
    }
}

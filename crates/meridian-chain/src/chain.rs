//! The interceptor chain.
//!
//! A chain holds interceptors sorted by phase and, within a phase, by their
//! before/after constraints and the order they were added. Walking the chain
//! runs [`Interceptor::handle_message`] on each in turn. From there a walk
//! ends in one of four ways:
//!
//! ```text
//!                       ┌──────────────► Complete
//!                       │
//! Created ──► Executing ┼──► Paused ──resume──► Executing
//!                       │      │  └──resume with fault──► AbortedFault
//!                       │      └──cancel / timeout──► AbortedCancel
//!                       │
//!                       └──fault──► AbortedFault
//! ```
//!
//! When interceptor *k* faults, interceptors *k-1* down to *1* get
//! [`Interceptor::handle_fault`] in that order and nothing after *k* runs.
//! Resuming with a fault unwinds from the interceptor that paused. Cancel
//! runs [`Interceptor::handle_cancel`] on every interceptor that ran,
//! latest first.
//!
//! An interceptor can also wrap the rest of the chain by calling
//! [`InterceptorContext::proceed`]. Everything after it runs inside that
//! call, once, and the walk picks up past it when the wrapper returns.

use crate::context::InterceptorContext;
use crate::continuation::{CancelReason, Continuation, Park, Shared, Signal};
use crate::observer::{FaultListener, FaultObserver};
use crate::phase::{PhaseId, PhaseOrder};
use crate::{ChainError, Flow, Interceptor, SharedInterceptor};
use meridian_core::{ChainId, ContentFormat, Exchange, Fault, FaultMode, MessageRole};
use meridian_telemetry::metrics::{record_chain, record_fault, record_unwind_error, ChainOutcomeLabel};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainState {
    /// Built but not yet walked.
    Created,
    /// An interceptor hook is running.
    Executing,
    /// Parked, waiting for a continuation.
    Paused,
    /// Every interceptor ran.
    Complete,
    /// A fault ended the walk.
    AbortedFault,
    /// Cancelled or timed out while paused.
    AbortedCancel,
}

impl ChainState {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Executing => "executing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::AbortedFault => "aborted_fault",
            Self::AbortedCancel => "aborted_cancel",
        }
    }

    /// Returns `true` once the chain can no longer run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::AbortedFault | Self::AbortedCancel
        )
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a call into a chain returned.
#[must_use]
pub enum ChainOutcome {
    /// Every interceptor ran.
    Complete(Exchange),
    /// An interceptor paused the chain. The exchange stays with the chain
    /// until the continuation drives it on.
    Paused(Continuation),
    /// A fault ended the walk after unwinding.
    Aborted {
        /// The exchange, with the fault stored on the processed message.
        exchange: Exchange,
        /// The fault, as enriched by the fault hooks.
        fault: Fault,
    },
    /// The chain was cancelled.
    Cancelled {
        /// The exchange.
        exchange: Exchange,
        /// Why it was cancelled.
        reason: CancelReason,
    },
}

impl ChainOutcome {
    /// The chain state this outcome corresponds to.
    #[must_use]
    pub const fn state(&self) -> ChainState {
        match self {
            Self::Complete(_) => ChainState::Complete,
            Self::Paused(_) => ChainState::Paused,
            Self::Aborted { .. } => ChainState::AbortedFault,
            Self::Cancelled { .. } => ChainState::AbortedCancel,
        }
    }

    /// The exchange, unless the chain is paused and still holds it.
    #[must_use]
    pub const fn exchange(&self) -> Option<&Exchange> {
        match self {
            Self::Complete(exchange)
            | Self::Aborted { exchange, .. }
            | Self::Cancelled { exchange, .. } => Some(exchange),
            Self::Paused(_) => None,
        }
    }

    /// Takes the exchange, unless the chain is paused and still holds it.
    #[must_use]
    pub fn into_exchange(self) -> Option<Exchange> {
        match self {
            Self::Complete(exchange)
            | Self::Aborted { exchange, .. }
            | Self::Cancelled { exchange, .. } => Some(exchange),
            Self::Paused(_) => None,
        }
    }

    /// The fault, for an aborted chain.
    #[must_use]
    pub const fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Aborted { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// The continuation, for a paused chain.
    #[must_use]
    pub const fn continuation(&self) -> Option<&Continuation> {
        match self {
            Self::Paused(continuation) => Some(continuation),
            _ => None,
        }
    }
}

impl fmt::Debug for ChainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(exchange) => f.debug_tuple("Complete").field(&exchange.id()).finish(),
            Self::Paused(continuation) => f.debug_tuple("Paused").field(continuation).finish(),
            Self::Aborted { exchange, fault } => f
                .debug_struct("Aborted")
                .field("exchange", &exchange.id())
                .field("fault", &fault.message())
                .finish(),
            Self::Cancelled { exchange, reason } => f
                .debug_struct("Cancelled")
                .field("exchange", &exchange.id())
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Why a walk stopped before the last entry.
pub(crate) enum Halt {
    Paused,
    Fault(Fault),
    Cancel(CancelReason),
}

/// How one stretch of walking ended.
enum Step {
    Complete,
    Paused,
    Aborted(Fault),
    Cancelled(CancelReason),
}

struct ChainEntry {
    interceptor: SharedInterceptor,
    phase: PhaseId,
}

impl ChainEntry {
    fn id(&self) -> &str {
        self.interceptor.id()
    }
}

/// An ordered, resumable sequence of interceptors for one message.
///
/// A chain is consumed by the walk that runs it; build a fresh one for each
/// message.
///
/// # Example
///
/// ```
/// use meridian_chain::{ChainOutcome, Flow, FnInterceptor, InterceptorChain, PhaseRegistry};
/// use meridian_core::{Exchange, Message, MessageRole};
///
/// let order = PhaseRegistry::sequential(["receive", "invoke"])?.order()?;
/// let mut chain = InterceptorChain::new(order);
/// chain.add(FnInterceptor::new("invoker", "invoke", |ctx| {
///     ctx.message_mut()?.insert("handled", true);
///     Ok(Flow::Continue)
/// }))?;
///
/// let mut exchange = Exchange::new();
/// exchange.set_in_message(Message::new());
///
/// let ChainOutcome::Complete(exchange) = chain.do_intercept(exchange, MessageRole::In) else {
///     panic!("chain did not complete");
/// };
/// assert!(exchange.in_message().unwrap().is_true("handled"));
/// # Ok::<(), meridian_chain::ChainError>(())
/// ```
pub struct InterceptorChain {
    order: Arc<PhaseOrder>,
    entries: Vec<ChainEntry>,
    shared: Arc<Shared>,
    observer: Option<Arc<dyn FaultObserver>>,
    pause_timeout: Option<Duration>,
    log_faults: bool,
    suspendable: bool,
    role: MessageRole,
    /// Index of the entry running now, or next to run.
    position: usize,
    /// Interceptors whose `handle_message` returned successfully, in order.
    executed: Vec<SharedInterceptor>,
}

impl InterceptorChain {
    /// Creates an empty chain over a resolved phase order.
    #[must_use]
    pub fn new(order: Arc<PhaseOrder>) -> Self {
        Self {
            order,
            entries: Vec::new(),
            shared: Shared::new(ChainId::new()),
            observer: None,
            pause_timeout: None,
            log_faults: true,
            suspendable: true,
            role: MessageRole::In,
            position: 0,
            executed: Vec::new(),
        }
    }

    /// Sets the observer told about faults once the chain has unwound.
    #[must_use]
    pub fn with_fault_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Cancels the chain if a pause is not resolved within `timeout`.
    ///
    /// Only armed when the chain pauses inside a Tokio runtime.
    #[must_use]
    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout = Some(timeout);
        self
    }

    /// Turns the default fault log line on or off.
    #[must_use]
    pub fn with_fault_logging(mut self, enabled: bool) -> Self {
        self.log_faults = enabled;
        self
    }

    /// Id of this chain.
    #[must_use]
    pub fn id(&self) -> ChainId {
        self.shared.chain_id()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChainState {
        self.shared.state()
    }

    /// The phase order this chain sorts by.
    #[must_use]
    pub fn phase_order(&self) -> &Arc<PhaseOrder> {
        &self.order
    }

    /// Adds an interceptor unless one with the same id is already in its
    /// phase. Returns whether it was added.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] if the phase is not in this
    /// chain's order.
    pub fn add<I: Interceptor>(&mut self, interceptor: I) -> Result<bool, ChainError> {
        self.add_shared(Arc::new(interceptor))
    }

    /// Adds a shared interceptor unless one with the same id is already in
    /// its phase.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] for an unknown phase.
    pub fn add_shared(&mut self, interceptor: SharedInterceptor) -> Result<bool, ChainError> {
        Ok(self.place(interceptor, false)?.is_some())
    }

    /// Adds an interceptor even if its id is already present.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] for an unknown phase.
    pub fn add_forced(&mut self, interceptor: SharedInterceptor) -> Result<(), ChainError> {
        self.place(interceptor, true).map(|_| ())
    }

    /// Adds every interceptor, skipping duplicates.
    ///
    /// # Errors
    ///
    /// Stops at the first interceptor with an unknown phase.
    pub fn add_all<I>(&mut self, interceptors: I) -> Result<(), ChainError>
    where
        I: IntoIterator<Item = SharedInterceptor>,
    {
        for interceptor in interceptors {
            self.add_shared(interceptor)?;
        }
        Ok(())
    }

    /// Removes every interceptor with this id. Returns whether any was
    /// removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id() != id);
        self.entries.len() != before
    }

    /// Returns `true` if an interceptor with this id is in the chain.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id() == id)
    }

    /// Interceptor ids in walk order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(ChainEntry::id).collect()
    }

    /// Interceptors in walk order.
    pub fn interceptors(&self) -> impl Iterator<Item = &SharedInterceptor> {
        self.entries.iter().map(|e| &e.interceptor)
    }

    /// Number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the chain has no interceptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts `interceptor` into place and returns its index, or `None` if a
    /// same-phase duplicate was skipped.
    ///
    /// Within its phase the interceptor goes after every entry it must
    /// follow and before every entry it must precede. Otherwise it goes
    /// last. If both cannot hold it goes right after the last entry it must
    /// follow.
    fn place(&mut self, interceptor: SharedInterceptor, force: bool) -> Result<Option<usize>, ChainError> {
        let phase = self.order.id(interceptor.phase()).ok_or_else(|| {
            ChainError::unknown_phase(interceptor.phase(), Some(interceptor.id()))
        })?;

        let start = self.entries.partition_point(|e| e.phase < phase);
        let end = self.entries.partition_point(|e| e.phase <= phase);
        let same_phase = &self.entries[start..end];
        let id = interceptor.id();

        if !force && same_phase.iter().any(|e| e.id() == id) {
            debug!(interceptor = id, "Interceptor already in phase; skipping");
            return Ok(None);
        }

        let must_precede = |e: &ChainEntry| {
            interceptor.after().iter().any(|a| a == e.id())
                || e.interceptor.before().iter().any(|b| b == id)
        };
        let must_follow = |e: &ChainEntry| {
            interceptor.before().iter().any(|b| b == e.id())
                || e.interceptor.after().iter().any(|a| a == id)
        };
        let lower = same_phase
            .iter()
            .rposition(must_precede)
            .map_or(start, |i| start + i + 1);
        let upper = same_phase
            .iter()
            .position(must_follow)
            .map_or(end, |i| start + i);

        let index = if lower <= upper {
            upper
        } else {
            warn!(
                interceptor = id,
                phase = interceptor.phase(),
                "Conflicting before/after constraints; placing after its predecessors"
            );
            lower
        };

        self.entries.insert(index, ChainEntry { interceptor, phase });
        Ok(Some(index))
    }

    /// Walks the chain from the first interceptor.
    pub fn do_intercept(self, exchange: Exchange, role: MessageRole) -> ChainOutcome {
        self.start(exchange, role, 0)
    }

    /// Walks the chain from the interceptor after `id`.
    ///
    /// With an unknown id nothing runs and the chain completes.
    pub fn do_intercept_starting_after(self, exchange: Exchange, role: MessageRole, id: &str) -> ChainOutcome {
        let position = self.position_of(id).map_or(self.entries.len(), |i| i + 1);
        self.start(exchange, role, position)
    }

    /// Walks the chain from the interceptor `id`.
    ///
    /// With an unknown id nothing runs and the chain completes.
    pub fn do_intercept_starting_at(self, exchange: Exchange, role: MessageRole, id: &str) -> ChainOutcome {
        let position = self.position_of(id).unwrap_or(self.entries.len());
        self.start(exchange, role, position)
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        let position = self.entries.iter().position(|e| e.id() == id);
        if position.is_none() {
            warn!(chain_id = %self.id(), interceptor = id, "Start interceptor not in chain");
        }
        position
    }

    fn start(mut self, mut exchange: Exchange, role: MessageRole, position: usize) -> ChainOutcome {
        self.role = role;
        self.position = position;
        self.shared.start();

        let chain_id = self.id();
        if let Some(message) = exchange.message_mut(role) {
            message.set_interceptor_chain(Some(chain_id));
        } else {
            let fault = Fault::server(format!("exchange {} has no {role} message", exchange.id()));
            warn!(chain_id = %chain_id, role = %role, "Nothing to process");
            self.shared.finish(ChainState::AbortedFault);
            return ChainOutcome::Aborted { exchange, fault };
        }

        debug!(
            chain_id = %chain_id,
            exchange_id = %exchange.id(),
            role = %role,
            interceptors = self.entries.len(),
            "Starting chain"
        );
        self.drive(exchange, None)
    }

    /// Runs the chain to the end against a borrowed exchange.
    ///
    /// Used for fault chains and other nested processing that cannot hand
    /// the exchange over. A [`Flow::Pause`] is logged and treated as
    /// [`Flow::Continue`].
    ///
    /// # Errors
    ///
    /// Returns the fault that aborted the chain, after unwinding.
    pub fn run_in_place(mut self, exchange: &mut Exchange, role: MessageRole) -> Result<(), Fault> {
        self.role = role;
        self.suspendable = false;
        self.shared.start();
        let Some(message) = exchange.message_mut(role) else {
            self.shared.finish(ChainState::AbortedFault);
            return Err(Fault::server(format!("exchange {} has no {role} message", exchange.id())));
        };
        message.set_interceptor_chain(Some(self.id()));

        let started = Instant::now();
        let step = self.walk(exchange);
        self.conclude(exchange, &step, started);
        match step {
            Step::Aborted(fault) => Err(fault),
            Step::Complete | Step::Paused | Step::Cancelled(_) => Ok(()),
        }
    }

    /// Drives the chain until it parks or finishes.
    pub(crate) fn drive(self, mut exchange: Exchange, mut signal: Option<Signal>) -> ChainOutcome {
        let mut chain = self;
        loop {
            let started = Instant::now();
            let step = match signal.take() {
                None | Some(Signal::Resume) => chain.walk(&mut exchange),
                Some(Signal::Fault(fault)) => chain.unwind_fault(&mut exchange, fault),
                Some(Signal::Cancel(reason)) => chain.unwind_cancel(&mut exchange, reason),
            };
            chain.conclude(&mut exchange, &step, started);

            match step {
                Step::Complete => return ChainOutcome::Complete(exchange),
                Step::Aborted(fault) => return ChainOutcome::Aborted { exchange, fault },
                Step::Cancelled(reason) => return ChainOutcome::Cancelled { exchange, reason },
                Step::Paused => {
                    let timeout = chain.pause_timeout;
                    let shared = Arc::clone(&chain.shared);
                    match shared.park(chain, exchange) {
                        Park::Parked(continuation) => {
                            if let Some(timeout) = timeout {
                                if continuation.spawn_timeout(timeout).is_none() {
                                    debug!(
                                        chain_id = %continuation.chain_id(),
                                        "No async runtime; pause timeout not armed"
                                    );
                                }
                            }
                            return ChainOutcome::Paused(continuation);
                        }
                        Park::Signalled(parked, returned, pending) => {
                            debug!(chain_id = %parked.id(), "Request arrived before the chain parked");
                            chain = parked;
                            exchange = returned;
                            signal = Some(pending);
                        }
                    }
                }
            }
        }
    }

    fn walk(&mut self, exchange: &mut Exchange) -> Step {
        match self.advance(exchange) {
            None => Step::Complete,
            Some(Halt::Paused) => Step::Paused,
            Some(Halt::Fault(fault)) => self.unwind_fault(exchange, fault),
            Some(Halt::Cancel(reason)) => self.unwind_cancel(exchange, reason),
        }
    }

    /// Runs entries from the cursor until the end or a halt. Nothing is
    /// unwound here.
    fn advance(&mut self, exchange: &mut Exchange) -> Option<Halt> {
        let order = Arc::clone(&self.order);
        let shared = Arc::clone(&self.shared);
        let role = self.role;

        while let Some(entry) = self.entries.get(self.position) {
            let interceptor = Arc::clone(&entry.interceptor);
            let mut ctx = InterceptorContext::new(exchange, role, &order, &shared, interceptor.id()).driving(self);
            let result = interceptor.handle_message(&mut ctx);
            let report = ctx.finish();

            let flow = match result {
                Ok(flow) => flow,
                Err(fault) => {
                    if shared.end_step().is_some() {
                        debug!(
                            chain_id = %shared.chain_id(),
                            interceptor = interceptor.id(),
                            "Discarding request made by an interceptor that faulted"
                        );
                    }
                    if let Some(Halt::Cancel(reason)) = report.downstream {
                        return Some(Halt::Cancel(reason));
                    }
                    debug!(
                        chain_id = %shared.chain_id(),
                        interceptor = interceptor.id(),
                        fault = %fault,
                        "Interceptor raised a fault"
                    );
                    return Some(Halt::Fault(fault));
                }
            };

            if report.proceeded {
                for new in report.inserted {
                    self.insert_running(new);
                }
            } else {
                self.step_done(Arc::clone(&interceptor), report.inserted);
            }
            if let Some(halt) = report.downstream {
                let _ = shared.end_step();
                return Some(halt);
            }

            if flow == Flow::Pause {
                if self.suspendable && !report.proceeded {
                    return Some(Halt::Paused);
                }
                warn!(
                    chain_id = %shared.chain_id(),
                    interceptor = interceptor.id(),
                    "Pause requested where the chain cannot pause; continuing"
                );
            }

            match shared.end_step() {
                None => {}
                Some(Signal::Resume) => debug!(
                    chain_id = %shared.chain_id(),
                    interceptor = interceptor.id(),
                    "Resume requested by an interceptor that did not pause; discarded"
                ),
                Some(Signal::Fault(fault)) => return Some(Halt::Fault(fault)),
                Some(Signal::Cancel(reason)) => return Some(Halt::Cancel(reason)),
            }
        }
        None
    }

    /// Marks the running entry as executed and moves past it.
    fn step_done(&mut self, interceptor: SharedInterceptor, inserted: Vec<SharedInterceptor>) {
        self.executed.push(interceptor);
        for new in inserted {
            self.insert_running(new);
        }
        self.position += 1;
    }

    /// Runs everything after the current entry on behalf of the interceptor
    /// that called [`InterceptorContext::proceed`]. The rest of the walk
    /// cannot pause, since the caller's frame is still on the stack.
    pub(crate) fn proceed_from(&mut self, exchange: &mut Exchange, inserted: Vec<SharedInterceptor>) -> Option<Halt> {
        let current = self.entries.get(self.position).map(|e| Arc::clone(&e.interceptor))?;
        debug!(chain_id = %self.id(), interceptor = current.id(), "Proceeding on behalf of wrapping interceptor");
        self.step_done(current, inserted);

        let suspendable = std::mem::replace(&mut self.suspendable, false);
        let halt = self.advance(exchange);
        self.suspendable = suspendable;
        halt
    }

    /// Places an interceptor added mid-walk. Anything landing at or behind
    /// the running entry shifts the cursor so it is never visited.
    fn insert_running(&mut self, interceptor: SharedInterceptor) {
        let id = interceptor.id().to_string();
        match self.place(interceptor, false) {
            Ok(Some(index)) if index <= self.position => {
                self.position += 1;
                debug!(interceptor = %id, "Inserted behind the cursor; it will not run in this walk");
            }
            Ok(_) => {}
            Err(error) => warn!(interceptor = %id, error = %error, "Dropping inserted interceptor"),
        }
    }

    fn unwind_fault(&mut self, exchange: &mut Exchange, mut fault: Fault) -> Step {
        let mode = fault.mode().unwrap_or_default();
        record_fault(mode);
        if let Some(message) = exchange.message_mut(self.role) {
            message.set_content(ContentFormat::FAULT, fault.clone());
        }
        self.notify(exchange, &fault, mode);

        let order = Arc::clone(&self.order);
        let shared = Arc::clone(&self.shared);
        for interceptor in self.executed.iter().rev() {
            let mut ctx = InterceptorContext::unwinding(exchange, self.role, &order, &shared, interceptor.id());
            if let Err(error) = interceptor.handle_fault(&mut ctx, &mut fault) {
                warn!(
                    chain_id = %shared.chain_id(),
                    interceptor = interceptor.id(),
                    error = %error,
                    "Fault hook failed during unwind"
                );
                record_unwind_error(interceptor.id());
            }
        }
        self.executed.clear();

        if let Some(message) = exchange.message_mut(self.role) {
            message.set_content(ContentFormat::FAULT, fault.clone());
        }
        if let Some(observer) = self.observer.clone() {
            observer.on_fault(exchange, self.role, &fault);
        }
        Step::Aborted(fault)
    }

    /// Tells the contextual [`FaultListener`], if any, and logs the fault
    /// unless the listener handled it.
    fn notify(&self, exchange: &Exchange, fault: &Fault, mode: FaultMode) {
        let listener = exchange
            .contextual_typed::<Arc<dyn FaultListener>>(self.role)
            .cloned();
        let log = listener.map_or(true, |l| l.fault_occurred(fault, exchange, self.role));
        if !(log && self.log_faults) {
            return;
        }

        let chain_id = self.id();
        if mode == FaultMode::CheckedApplicationFault {
            info!(
                chain_id = %chain_id,
                exchange_id = %exchange.id(),
                role = %self.role,
                mode = mode.as_str(),
                "Application fault: {}",
                fault.message()
            );
        } else {
            warn!(
                chain_id = %chain_id,
                exchange_id = %exchange.id(),
                role = %self.role,
                mode = mode.as_str(),
                code = ?fault.code(),
                "Interceptor chain aborted: {}",
                fault.message()
            );
        }
    }

    fn unwind_cancel(&mut self, exchange: &mut Exchange, reason: CancelReason) -> Step {
        info!(chain_id = %self.id(), reason = %reason, "Chain cancelled");
        let order = Arc::clone(&self.order);
        let shared = Arc::clone(&self.shared);
        for interceptor in self.executed.iter().rev() {
            let mut ctx = InterceptorContext::unwinding(exchange, self.role, &order, &shared, interceptor.id());
            interceptor.handle_cancel(&mut ctx);
        }
        self.executed.clear();
        Step::Cancelled(reason)
    }

    /// Records metrics for one stretch of walking and settles terminal state.
    fn conclude(&self, exchange: &mut Exchange, step: &Step, started: Instant) {
        let (label, terminal) = match step {
            Step::Complete => (ChainOutcomeLabel::Complete, Some(ChainState::Complete)),
            Step::Paused => (ChainOutcomeLabel::Paused, None),
            Step::Aborted(_) => (ChainOutcomeLabel::Fault, Some(ChainState::AbortedFault)),
            Step::Cancelled(_) => (ChainOutcomeLabel::Cancel, Some(ChainState::AbortedCancel)),
        };
        record_chain(self.role, label, started.elapsed());

        match terminal {
            Some(state) => {
                self.shared.finish(state);
                if let Some(message) = exchange.message_mut(self.role) {
                    message.set_interceptor_chain(None);
                }
                debug!(chain_id = %self.id(), state = %state, "Chain finished");
            }
            None => debug!(chain_id = %self.id(), position = self.position, "Chain paused"),
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("interceptors", &self.ids())
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FnInterceptor, PhaseRegistry};
    use meridian_core::fixtures::request_exchange;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn order() -> Arc<PhaseOrder> {
        PhaseRegistry::sequential(["receive", "decode", "invoke", "send"])
            .unwrap()
            .order()
            .unwrap()
    }

    #[derive(Default, Clone, Copy)]
    enum Behaviour {
        #[default]
        Pass,
        Fail,
        Pause,
    }

    /// Records every hook it sees in a shared log.
    struct Recorder {
        id: String,
        phase: String,
        before: Vec<String>,
        after: Vec<String>,
        behaviour: Behaviour,
        unwind_fails: bool,
        log: Log,
    }

    impl Recorder {
        fn new(id: &str, phase: &str, log: &Log) -> Self {
            Self {
                id: id.to_string(),
                phase: phase.to_string(),
                before: Vec::new(),
                after: Vec::new(),
                behaviour: Behaviour::Pass,
                unwind_fails: false,
                log: Arc::clone(log),
            }
        }

        fn before(mut self, id: &str) -> Self {
            self.before.push(id.to_string());
            self
        }

        fn after(mut self, id: &str) -> Self {
            self.after.push(id.to_string());
            self
        }

        fn behaving(mut self, behaviour: Behaviour) -> Self {
            self.behaviour = behaviour;
            self
        }

        fn failing_unwind(mut self) -> Self {
            self.unwind_fails = true;
            self
        }
    }

    impl Interceptor for Recorder {
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

        fn handle_message(&self, _ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
            self.log.lock().push(format!("msg:{}", self.id));
            match self.behaviour {
                Behaviour::Pass => Ok(Flow::Continue),
                Behaviour::Pause => Ok(Flow::Pause),
                Behaviour::Fail => Err(Fault::server(format!("{} failed", self.id))),
            }
        }

        fn handle_fault(&self, _ctx: &mut InterceptorContext<'_>, fault: &mut Fault) -> Result<(), Fault> {
            self.log.lock().push(format!("fault:{}", self.id));
            if self.unwind_fails {
                return Err(Fault::server("unwind failed"));
            }
            let detail = fault.detail_mut().get_or_insert_with(|| serde_json::json!([]));
            if let Some(list) = detail.as_array_mut() {
                list.push(serde_json::Value::String(self.id.clone()));
            }
            Ok(())
        }

        fn handle_cancel(&self, _ctx: &mut InterceptorContext<'_>) {
            self.log.lock().push(format!("cancel:{}", self.id));
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    fn chain_of(recorders: Vec<Recorder>) -> InterceptorChain {
        let mut chain = InterceptorChain::new(order());
        for recorder in recorders {
            chain.add(recorder).unwrap();
        }
        chain
    }

    #[test]
    fn test_new_chain_is_created() {
        let chain = InterceptorChain::new(order());
        assert_eq!(chain.state(), ChainState::Created);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_add_skips_duplicates_unless_forced() {
        let log = Log::default();
        let mut chain = InterceptorChain::new(order());
        assert!(chain.add(Recorder::new("a", "invoke", &log)).unwrap());
        assert!(!chain.add(Recorder::new("a", "invoke", &log)).unwrap());
        assert!(chain.add(Recorder::new("a", "send", &log)).unwrap());
        chain
            .add_forced(Arc::new(Recorder::new("a", "invoke", &log)))
            .unwrap();

        assert_eq!(chain.ids(), ["a", "a", "a"]);
        assert!(chain.remove("a"));
        assert!(chain.is_empty());
        assert!(!chain.remove("a"));
    }

    #[test]
    fn test_unknown_phase_is_rejected() {
        let log = Log::default();
        let mut chain = InterceptorChain::new(order());
        assert_eq!(
            chain.add(Recorder::new("a", "marshal", &log)).unwrap_err(),
            ChainError::UnknownPhase {
                phase: "marshal".to_string(),
                referenced_by: Some("a".to_string()),
            }
        );
    }

    #[test]
    fn test_phase_order_beats_registration_order() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("send", "send", &log),
            Recorder::new("invoke", "invoke", &log),
            Recorder::new("receive", "receive", &log),
        ]);
        assert_eq!(chain.ids(), ["receive", "invoke", "send"]);
    }

    #[test]
    fn test_same_phase_keeps_registration_order() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("a", "invoke", &log),
            Recorder::new("b", "invoke", &log),
            Recorder::new("c", "invoke", &log),
        ]);
        assert_eq!(chain.ids(), ["a", "b", "c"]);
    }

    #[test]
    fn test_before_and_after_within_phase() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("c", "invoke", &log),
            Recorder::new("a", "invoke", &log).before("c"),
            Recorder::new("b", "invoke", &log).after("a").before("c"),
        ]);
        assert_eq!(chain.ids(), ["a", "b", "c"]);
    }

    #[test]
    fn test_constraint_declared_by_existing_entry() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("first", "invoke", &log).before("second"),
            Recorder::new("other", "invoke", &log),
            Recorder::new("last", "invoke", &log).after("second"),
        ]);
        assert_eq!(chain.ids(), ["first", "other", "last"]);

        let mut chain = chain;
        chain.add(Recorder::new("second", "invoke", &log)).unwrap();
        assert_eq!(chain.ids(), ["first", "other", "second", "last"]);
    }

    #[test]
    fn test_conflicting_constraints_place_after_predecessors() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("a", "invoke", &log),
            Recorder::new("b", "invoke", &log),
            Recorder::new("x", "invoke", &log).after("b").before("a"),
        ]);
        assert_eq!(chain.ids(), ["a", "b", "x"]);
    }

    #[test]
    fn test_complete_walk() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("c", "send", &log),
            Recorder::new("a", "receive", &log),
            Recorder::new("b", "invoke", &log),
        ]);
        let chain_id = chain.id();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::Complete);
        assert_eq!(entries(&log), ["msg:a", "msg:b", "msg:c"]);

        let exchange = outcome.into_exchange().unwrap();
        let message = exchange.in_message().unwrap();
        assert_ne!(message.interceptor_chain(), Some(chain_id));
        assert!(message.interceptor_chain().is_none());
    }

    #[test]
    fn test_chain_handle_visible_during_walk() {
        let seen = Arc::new(Mutex::new(None));
        let recorder = Arc::clone(&seen);
        let mut chain = InterceptorChain::new(order());
        chain
            .add(FnInterceptor::new("peek", "invoke", move |ctx| {
                *recorder.lock() = ctx.message()?.interceptor_chain();
                Ok(Flow::Continue)
            }))
            .unwrap();
        let chain_id = chain.id();

        let _ = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(*seen.lock(), Some(chain_id));
    }

    #[test]
    fn test_missing_message_aborts() {
        let chain = InterceptorChain::new(order());
        let outcome = chain.do_intercept(Exchange::new(), MessageRole::Out);
        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert!(outcome.fault().unwrap().message().contains("no out message"));
    }

    #[test]
    fn test_fault_unwinds_in_reverse_and_stops_walk() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "decode", &log),
            Recorder::new("3", "invoke", &log).behaving(Behaviour::Fail),
            Recorder::new("4", "send", &log),
        ]);

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert_eq!(
            entries(&log),
            ["msg:1", "msg:2", "msg:3", "fault:2", "fault:1"]
        );

        let ChainOutcome::Aborted { exchange, fault } = outcome else {
            panic!("expected abort");
        };
        assert_eq!(fault.message(), "3 failed");
        assert_eq!(fault.detail(), Some(&serde_json::json!(["2", "1"])));

        let stored = exchange
            .in_message()
            .unwrap()
            .content::<Fault>(ContentFormat::FAULT)
            .unwrap()
            .unwrap();
        assert_eq!(stored.detail(), Some(&serde_json::json!(["2", "1"])));
    }

    #[test]
    fn test_first_interceptor_fault_unwinds_nothing() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log).behaving(Behaviour::Fail),
            Recorder::new("2", "send", &log),
        ]);
        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert_eq!(entries(&log), ["msg:1"]);
    }

    #[test]
    fn test_failing_fault_hook_does_not_stop_unwind() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "decode", &log).failing_unwind(),
            Recorder::new("3", "invoke", &log).behaving(Behaviour::Fail),
        ]);

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(
            entries(&log),
            ["msg:1", "msg:2", "msg:3", "fault:2", "fault:1"]
        );
        assert_eq!(outcome.fault().unwrap().message(), "3 failed");
    }

    #[test]
    fn test_insertion_in_same_phase_runs() {
        let log = Log::default();
        let inserted_log = Arc::clone(&log);
        let mut chain = chain_of(vec![Recorder::new("tail", "send", &log)]);
        chain
            .add(FnInterceptor::new("inserter", "invoke", move |ctx| {
                ctx.insert(Recorder::new("late", "invoke", &inserted_log))?;
                Ok(Flow::Continue)
            }))
            .unwrap();

        let _ = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(entries(&log), ["msg:late", "msg:tail"]);
    }

    #[test]
    fn test_insertion_in_later_phase_runs_in_order() {
        let log = Log::default();
        let inserted_log = Arc::clone(&log);
        let mut chain = chain_of(vec![
            Recorder::new("invoke", "invoke", &log),
            Recorder::new("send", "send", &log),
        ]);
        chain
            .add(FnInterceptor::new("inserter", "receive", move |ctx| {
                ctx.insert(Recorder::new("decode", "decode", &inserted_log))?;
                Ok(Flow::Continue)
            }))
            .unwrap();

        let _ = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(entries(&log), ["msg:decode", "msg:invoke", "msg:send"]);
    }

    #[test]
    fn test_insertion_behind_cursor_never_runs() {
        let log = Log::default();
        let inserted_log = Arc::clone(&log);
        let mut chain = chain_of(vec![
            Recorder::new("receive", "receive", &log),
            Recorder::new("send", "send", &log),
        ]);
        chain
            .add(FnInterceptor::new("inserter", "invoke", move |ctx| {
                ctx.insert(Recorder::new("early", "decode", &inserted_log))?;
                ctx.insert(Recorder::new("first", "invoke", &inserted_log).before("inserter"))?;
                Ok(Flow::Continue)
            }))
            .unwrap();

        let _ = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(entries(&log), ["msg:receive", "msg:send"]);
    }

    #[test]
    fn test_insertion_with_unknown_phase_is_an_error() {
        let log = Log::default();
        let inserted_log = Arc::clone(&log);
        let mut chain = InterceptorChain::new(order());
        chain
            .add(FnInterceptor::new("inserter", "invoke", move |ctx| {
                ctx.insert(Recorder::new("x", "marshal", &inserted_log))?;
                Ok(Flow::Continue)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(
            outcome.fault().unwrap().message(),
            "unknown phase 'marshal' (referenced by 'x')"
        );
    }

    #[test]
    fn test_start_after_and_at() {
        let log = Log::default();
        let recorders = || {
            vec![
                Recorder::new("1", "receive", &log),
                Recorder::new("2", "invoke", &log),
                Recorder::new("3", "send", &log),
            ]
        };

        let _ = chain_of(recorders()).do_intercept_starting_after(request_exchange("hi"), MessageRole::In, "1");
        assert_eq!(entries(&log), ["msg:2", "msg:3"]);

        log.lock().clear();
        let _ = chain_of(recorders()).do_intercept_starting_at(request_exchange("hi"), MessageRole::In, "3");
        assert_eq!(entries(&log), ["msg:3"]);

        log.lock().clear();
        let outcome = chain_of(recorders()).do_intercept_starting_after(
            request_exchange("hi"),
            MessageRole::In,
            "missing",
        );
        assert_eq!(outcome.state(), ChainState::Complete);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_pause_then_resume_continues_from_cursor() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "invoke", &log).behaving(Behaviour::Pause),
            Recorder::new("3", "send", &log),
        ]);

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::Paused);
        assert!(outcome.exchange().is_none());
        assert_eq!(entries(&log), ["msg:1", "msg:2"]);

        let continuation = outcome.continuation().unwrap().clone();
        let resumed = continuation.resume().unwrap().into_outcome().unwrap();
        assert_eq!(resumed.state(), ChainState::Complete);
        assert_eq!(entries(&log), ["msg:1", "msg:2", "msg:3"]);
    }

    #[test]
    fn test_pause_twice() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log).behaving(Behaviour::Pause),
            Recorder::new("2", "invoke", &log).behaving(Behaviour::Pause),
            Recorder::new("3", "send", &log),
        ]);

        let ChainOutcome::Paused(first) = chain.do_intercept(request_exchange("hi"), MessageRole::In) else {
            panic!("expected first pause");
        };
        let Some(ChainOutcome::Paused(second)) = first.resume().unwrap().into_outcome() else {
            panic!("expected second pause");
        };
        assert!(first.resume().is_err());
        assert!(!first.is_paused());
        assert!(second.is_paused());

        let done = second.resume().unwrap().into_outcome().unwrap();
        assert_eq!(done.state(), ChainState::Complete);
        assert_eq!(entries(&log), ["msg:1", "msg:2", "msg:3"]);
    }

    #[test]
    fn test_resume_with_fault_unwinds_from_pause_point() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "invoke", &log).behaving(Behaviour::Pause),
            Recorder::new("3", "send", &log),
        ]);

        let ChainOutcome::Paused(continuation) = chain.do_intercept(request_exchange("hi"), MessageRole::In) else {
            panic!("expected pause");
        };
        let outcome = continuation
            .resume_with_fault(Fault::server("backend down"))
            .unwrap()
            .into_outcome()
            .unwrap();

        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert_eq!(outcome.fault().unwrap().message(), "backend down");
        assert_eq!(
            entries(&log),
            ["msg:1", "msg:2", "fault:2", "fault:1"]
        );
    }

    #[test]
    fn test_cancel_runs_cancel_hooks_in_reverse() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "invoke", &log).behaving(Behaviour::Pause),
            Recorder::new("3", "send", &log),
        ]);

        let ChainOutcome::Paused(continuation) = chain.do_intercept(request_exchange("hi"), MessageRole::In) else {
            panic!("expected pause");
        };
        let outcome = continuation.cancel().unwrap().into_outcome().unwrap();

        assert_eq!(outcome.state(), ChainState::AbortedCancel);
        assert_eq!(
            entries(&log),
            ["msg:1", "msg:2", "cancel:2", "cancel:1"]
        );
    }

    #[test]
    fn test_resume_before_park_is_honoured() {
        let log = Log::default();
        let mut chain = chain_of(vec![Recorder::new("tail", "send", &log)]);
        chain
            .add(FnInterceptor::new("eager", "invoke", |ctx| {
                let continuation = ctx.continuation();
                assert!(matches!(continuation.resume(), Ok(crate::Resumption::Deferred)));
                assert!(continuation.resume().is_err());
                Ok(Flow::Pause)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::Complete);
        assert_eq!(entries(&log), ["msg:tail"]);
    }

    #[test]
    fn test_cancel_while_running_stops_at_next_step() {
        let log = Log::default();
        let mut chain = chain_of(vec![
            Recorder::new("first", "receive", &log),
            Recorder::new("tail", "send", &log),
        ]);
        chain
            .add(FnInterceptor::new("canceller", "invoke", |ctx| {
                let _ = ctx.continuation().cancel();
                Ok(Flow::Continue)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert!(matches!(
            outcome,
            ChainOutcome::Cancelled {
                reason: CancelReason::Requested,
                ..
            }
        ));
        assert_eq!(entries(&log), ["msg:first", "cancel:first"]);
    }

    #[test]
    fn test_fault_requested_while_running_unwinds() {
        let log = Log::default();
        let mut chain = chain_of(vec![
            Recorder::new("first", "receive", &log),
            Recorder::new("tail", "send", &log),
        ]);
        chain
            .add(FnInterceptor::new("rejecter", "invoke", |ctx| {
                let requested = ctx.continuation().resume_with_fault(Fault::server("boom"));
                assert!(matches!(requested, Ok(crate::Resumption::Deferred)));
                Ok(Flow::Continue)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert_eq!(outcome.fault().unwrap().message(), "boom");
        assert_eq!(entries(&log), ["msg:first", "fault:first"]);
    }

    #[test]
    fn test_resume_without_pause_does_not_skip_later_pause() {
        let log = Log::default();
        let early: Arc<Mutex<Option<Continuation>>> = Arc::default();
        let mut chain = chain_of(vec![
            Recorder::new("pauser", "invoke", &log).behaving(Behaviour::Pause),
            Recorder::new("tail", "send", &log),
        ]);
        let kept = Arc::clone(&early);
        chain
            .add(FnInterceptor::new("early", "receive", move |ctx| {
                let continuation = ctx.continuation();
                assert!(matches!(continuation.resume(), Ok(crate::Resumption::Deferred)));
                *kept.lock() = Some(continuation);
                Ok(Flow::Continue)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::Paused);
        assert_eq!(entries(&log), ["msg:pauser"]);

        let stale = early.lock().take().unwrap();
        assert!(!stale.is_paused());
        assert!(stale.resume().is_err());
        assert_eq!(entries(&log), ["msg:pauser"]);

        let done = outcome
            .continuation()
            .unwrap()
            .resume()
            .unwrap()
            .into_outcome()
            .unwrap();
        assert_eq!(done.state(), ChainState::Complete);
        assert_eq!(entries(&log), ["msg:pauser", "msg:tail"]);
    }

    /// Runs the rest of the chain from inside its own hook and records
    /// what it sees afterwards.
    struct Wrapper {
        log: Log,
        phase: &'static str,
    }

    impl Interceptor for Wrapper {
        fn id(&self) -> &str {
            "wrapper"
        }

        fn phase(&self) -> &str {
            self.phase
        }

        fn handle_message(&self, ctx: &mut InterceptorContext<'_>) -> Result<Flow, Fault> {
            self.log.lock().push("msg:wrapper".to_string());
            let result = ctx.proceed();
            self.log.lock().push(format!("after:wrapper ok={}", result.is_ok()));
            result.map(|()| Flow::Continue)
        }

        fn handle_fault(&self, _ctx: &mut InterceptorContext<'_>, _fault: &mut Fault) -> Result<(), Fault> {
            self.log.lock().push("fault:wrapper".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_wrapped_invocation_runs_each_interceptor_once() {
        let log = Log::default();
        let mut chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("3", "send", &log),
        ]);
        chain
            .add(Wrapper {
                log: Arc::clone(&log),
                phase: "invoke",
            })
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::Complete);
        assert_eq!(
            entries(&log),
            ["msg:1", "msg:wrapper", "msg:3", "after:wrapper ok=true"]
        );
    }

    #[test]
    fn test_wrapped_invocation_unwinds_downstream_fault() {
        let log = Log::default();
        let mut chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "invoke", &log),
            Recorder::new("3", "send", &log).behaving(Behaviour::Fail),
        ]);
        chain
            .add(Wrapper {
                log: Arc::clone(&log),
                phase: "decode",
            })
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert_eq!(outcome.fault().unwrap().message(), "3 failed");
        assert_eq!(
            entries(&log),
            [
                "msg:1",
                "msg:wrapper",
                "msg:2",
                "msg:3",
                "after:wrapper ok=false",
                "fault:2",
                "fault:wrapper",
                "fault:1",
            ]
        );
    }

    #[test]
    fn test_swallowed_downstream_fault_still_aborts() {
        let log = Log::default();
        let mut chain = chain_of(vec![Recorder::new("3", "send", &log).behaving(Behaviour::Fail)]);
        chain
            .add(FnInterceptor::new("swallower", "invoke", |ctx| {
                assert!(ctx.proceed().is_err());
                assert!(ctx.proceed().is_err());
                Ok(Flow::Continue)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::AbortedFault);
        assert_eq!(outcome.fault().unwrap().message(), "3 failed");
    }

    #[test]
    fn test_pause_after_proceeding_is_ignored() {
        let log = Log::default();
        let mut chain = chain_of(vec![Recorder::new("3", "send", &log).behaving(Behaviour::Pause)]);
        chain
            .add(FnInterceptor::new("wrapper", "invoke", |ctx| {
                ctx.proceed()?;
                Ok(Flow::Pause)
            }))
            .unwrap();

        let outcome = chain.do_intercept(request_exchange("hi"), MessageRole::In);
        assert_eq!(outcome.state(), ChainState::Complete);
        assert_eq!(entries(&log), ["msg:3"]);
    }

    #[test]
    fn test_run_in_place_ignores_pause() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "invoke", &log).behaving(Behaviour::Pause),
            Recorder::new("2", "send", &log),
        ]);
        let mut exchange = request_exchange("hi");

        assert!(chain.run_in_place(&mut exchange, MessageRole::In).is_ok());
        assert_eq!(entries(&log), ["msg:1", "msg:2"]);
    }

    #[test]
    fn test_run_in_place_reports_fault() {
        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "invoke", &log),
            Recorder::new("2", "send", &log).behaving(Behaviour::Fail),
        ]);
        let mut exchange = request_exchange("hi");

        let fault = chain.run_in_place(&mut exchange, MessageRole::In).unwrap_err();
        assert_eq!(fault.message(), "2 failed");
        assert!(exchange.in_message().unwrap().has_content(ContentFormat::FAULT));
    }

    #[test]
    fn test_fault_listener_and_observer() {
        struct Listener(Arc<Mutex<Vec<String>>>);
        impl FaultListener for Listener {
            fn fault_occurred(&self, fault: &Fault, _exchange: &Exchange, role: MessageRole) -> bool {
                self.0.lock().push(format!("listener:{role}:{}", fault.message()));
                false
            }
        }
        struct Observer(Arc<Mutex<Vec<String>>>);
        impl FaultObserver for Observer {
            fn on_fault(&self, exchange: &mut Exchange, _role: MessageRole, fault: &Fault) {
                self.0.lock().push(format!("observer:{}", fault.message()));
                exchange.insert("observed", true);
            }
        }

        let log = Log::default();
        let chain = chain_of(vec![
            Recorder::new("1", "receive", &log),
            Recorder::new("2", "invoke", &log).behaving(Behaviour::Fail),
        ])
        .with_fault_observer(Arc::new(Observer(Arc::clone(&log))));

        let mut exchange = request_exchange("hi");
        let listener: Arc<dyn FaultListener> = Arc::new(Listener(Arc::clone(&log)));
        exchange.put(listener);

        let outcome = chain.do_intercept(exchange, MessageRole::In);
        assert_eq!(
            entries(&log),
            [
                "msg:1",
                "msg:2",
                "listener:in:2 failed",
                "fault:1",
                "observer:2 failed"
            ]
        );
        assert!(outcome.exchange().unwrap().is_true("observed"));
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = InterceptorChain::new(order()).do_intercept(request_exchange("hi"), MessageRole::In);
        assert!(outcome.exchange().is_some());
        assert!(outcome.fault().is_none());
        assert!(outcome.continuation().is_none());
        assert!(format!("{outcome:?}").starts_with("Complete"));
    }

    proptest! {
        /// An interceptor inserted mid-walk runs exactly when its position is
        /// ahead of the inserting interceptor, and never re-runs anything.
        #[test]
        fn prop_inserted_interceptor_runs_only_ahead_of_cursor(
            phases in proptest::collection::vec(0usize..4, 1..8),
            inserter in 0usize..8,
            target in 0usize..4,
        ) {
            let names = ["receive", "decode", "invoke", "send"];
            let inserter = inserter % phases.len();
            let inserter_phase = phases[inserter];
            let log = Log::default();
            let inserted_log = Arc::clone(&log);

            let mut chain = InterceptorChain::new(order());
            for (i, phase) in phases.iter().enumerate() {
                if i == inserter {
                    let inserted = Arc::clone(&inserted_log);
                    chain.add(FnInterceptor::new(format!("p{i}"), names[*phase], move |ctx| {
                        inserted.lock().push(ctx.interceptor_id().to_string());
                        ctx.insert(Recorder::new("new", names[target], &inserted))?;
                        Ok(Flow::Continue)
                    })).unwrap();
                } else {
                    chain.add(FnInterceptor::new(format!("p{i}"), names[*phase], {
                        let log = Arc::clone(&log);
                        move |ctx| {
                            log.lock().push(ctx.interceptor_id().to_string());
                            Ok(Flow::Continue)
                        }
                    })).unwrap();
                }
            }

            let _ = chain.do_intercept(request_exchange("hi"), MessageRole::In);
            let ran = entries(&log);

            // Every original interceptor ran exactly once.
            for i in 0..phases.len() {
                let id = format!("p{i}");
                prop_assert_eq!(ran.iter().filter(|r| **r == id).count(), 1);
            }

            // Same-phase insertions go to the end of the phase, so they land
            // ahead of the cursor. Earlier phases never run.
            let expect_run = target >= inserter_phase;
            prop_assert_eq!(ran.contains(&"msg:new".to_string()), expect_run);

            if expect_run {
                let position = ran.iter().position(|r| r == "msg:new").unwrap();
                let inserter_position = ran.iter().position(|r| *r == format!("p{inserter}")).unwrap();
                prop_assert!(position > inserter_position);
                // Everything after it is in a later phase or the same one.
                for later in &ran[position + 1..] {
                    let index: usize = later[1..].parse().unwrap();
                    prop_assert!(phases[index] >= target);
                }
            }
        }
    }
}

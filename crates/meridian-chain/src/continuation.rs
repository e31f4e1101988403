//! Pause, resume and cancellation of a running chain.
//!
//! A chain that pauses is parked inside state shared with every
//! [`Continuation`] handed out for it. Whoever holds a continuation can then
//! resume the walk, resume it with a fault, or cancel it, from any thread.
//! All three go through one lock, so exactly one request wins for a given
//! pause and the others get [`ChainError::NotPaused`].
//!
//! A request that arrives while the chain is still running, before the
//! interceptor that took the continuation has returned
//! [`Flow::Pause`](crate::Flow::Pause), is remembered and honoured by the
//! walking thread as soon as it parks. If that interceptor returns without
//! pausing, a pending fault or cancel unwinds the chain right away, and a
//! pending resume is discarded because there is no pause for it to end.
//!
//! Each step and each pause has its own epoch. A continuation taken before
//! pause *n* is stale once pause *n* has been resumed, and one taken by an
//! interceptor that did not pause is stale once it returns, so neither can
//! drive a later pause.

use crate::chain::{ChainOutcome, ChainState, InterceptorChain};
use crate::ChainError;
use meridian_core::{ChainId, Exchange, Fault};
use meridian_telemetry::metrics::PausedGuard;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Why a chain was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// [`Continuation::cancel`] was called.
    Requested,
    /// A pause timeout elapsed.
    Timeout,
    /// Every continuation for a paused chain was dropped.
    Abandoned,
}

impl CancelReason {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Timeout => "timeout",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a paused chain is asked to do next.
pub(crate) enum Signal {
    Resume,
    Fault(Fault),
    Cancel(CancelReason),
}

/// Result of a resume, resume-with-fault or cancel request that won.
#[must_use]
#[derive(Debug)]
pub enum Resumption {
    /// The chain was parked and the request drove it on this thread.
    Ran(ChainOutcome),
    /// The chain had not parked yet. The walking thread will act on the
    /// request as soon as it does.
    Deferred,
}

impl Resumption {
    /// The outcome, if the request drove the chain itself.
    #[must_use]
    pub fn into_outcome(self) -> Option<ChainOutcome> {
        match self {
            Self::Ran(outcome) => Some(outcome),
            Self::Deferred => None,
        }
    }
}

struct Parked {
    chain: InterceptorChain,
    exchange: Exchange,
    _gauge: PausedGuard,
}

enum Slot {
    Idle,
    Running { pending: Option<Signal> },
    Parked(Box<Parked>),
    Finished(ChainState),
}

impl Slot {
    const fn state(&self) -> ChainState {
        match self {
            Self::Idle => ChainState::Created,
            Self::Running { .. } => ChainState::Executing,
            Self::Parked(_) => ChainState::Paused,
            Self::Finished(state) => *state,
        }
    }
}

struct Inner {
    epoch: u64,
    handles: usize,
    slot: Slot,
}

/// State shared between a chain and its continuations.
pub(crate) struct Shared {
    chain_id: ChainId,
    inner: Mutex<Inner>,
}

pub(crate) enum Park {
    Parked(Continuation),
    Signalled(InterceptorChain, Exchange, Signal),
}

impl Shared {
    pub(crate) fn new(chain_id: ChainId) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            inner: Mutex::new(Inner {
                epoch: 0,
                handles: 0,
                slot: Slot::Idle,
            }),
        })
    }

    pub(crate) const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub(crate) fn state(&self) -> ChainState {
        self.inner.lock().slot.state()
    }

    pub(crate) fn start(&self) {
        self.inner.lock().slot = Slot::Running { pending: None };
    }

    pub(crate) fn finish(&self, state: ChainState) {
        self.inner.lock().slot = Slot::Finished(state);
    }

    /// Closes a step that did not park. Continuations taken during it go
    /// stale, and a request they made while it ran is handed back.
    pub(crate) fn end_step(&self) -> Option<Signal> {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        match &mut inner.slot {
            Slot::Running { pending } => pending.take(),
            _ => None,
        }
    }

    /// Parks the chain, or hands back a request that beat it here.
    pub(crate) fn park(self: &Arc<Self>, chain: InterceptorChain, exchange: Exchange) -> Park {
        let mut inner = self.inner.lock();
        if let Slot::Running { pending } = &mut inner.slot {
            if let Some(signal) = pending.take() {
                inner.epoch += 1;
                return Park::Signalled(chain, exchange, signal);
            }
        }
        inner.slot = Slot::Parked(Box::new(Parked {
            chain,
            exchange,
            _gauge: PausedGuard::new(),
        }));
        inner.handles += 1;
        Park::Parked(Continuation {
            shared: Arc::clone(self),
            epoch: inner.epoch,
        })
    }
}

/// Handle for driving a paused chain.
///
/// Cheap to clone and safe to send to other threads. Dropping the last
/// handle of a paused chain cancels it with [`CancelReason::Abandoned`] so
/// interceptors get to release what they hold.
pub struct Continuation {
    shared: Arc<Shared>,
    epoch: u64,
}

impl Continuation {
    /// A handle for the current or upcoming pause.
    pub(crate) fn current(shared: &Arc<Shared>) -> Self {
        let mut inner = shared.inner.lock();
        inner.handles += 1;
        Self {
            shared: Arc::clone(shared),
            epoch: inner.epoch,
        }
    }

    /// Id of the chain this continuation drives.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.shared.chain_id()
    }

    /// Current state of the chain.
    #[must_use]
    pub fn state(&self) -> ChainState {
        self.shared.state()
    }

    /// Returns `true` if the chain is parked at the pause this handle was
    /// taken for.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.epoch == self.epoch && matches!(inner.slot, Slot::Parked(_))
    }

    /// Continues the walk after the interceptor that paused.
    ///
    /// Called before that interceptor has returned, the resume is
    /// [`Resumption::Deferred`] and only takes effect if it then returns
    /// [`Flow::Pause`](crate::Flow::Pause).
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NotPaused`] if another request already won this
    /// pause or the chain has finished.
    pub fn resume(&self) -> Result<Resumption, ChainError> {
        self.signal(Signal::Resume)
    }

    /// Unwinds the chain with `fault`, starting from the interceptor that
    /// paused.
    ///
    /// Called while the chain is running, the fault unwinds it as soon as
    /// the current interceptor returns, whether or not it pauses.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NotPaused`] if another request already won this
    /// pause or the chain has finished.
    pub fn resume_with_fault(&self, fault: Fault) -> Result<Resumption, ChainError> {
        self.signal(Signal::Fault(fault))
    }

    /// Cancels the chain, running cancel hooks of every interceptor that ran.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NotPaused`] if another request already won this
    /// pause or the chain has finished.
    pub fn cancel(&self) -> Result<Resumption, ChainError> {
        self.signal(Signal::Cancel(CancelReason::Requested))
    }

    /// Cancels the chain with [`CancelReason::Timeout`] unless something
    /// else resolves this pause within `after`.
    ///
    /// The returned task yields the outcome if the timeout won. Returns
    /// `None` outside a Tokio runtime.
    #[must_use = "dropping the handle detaches the timeout, it does not cancel it"]
    pub fn spawn_timeout(&self, after: Duration) -> Option<JoinHandle<Option<ChainOutcome>>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let continuation = self.clone();
        Some(runtime.spawn(async move {
            tokio::time::sleep(after).await;
            match continuation.signal(Signal::Cancel(CancelReason::Timeout)) {
                Ok(resumption) => resumption.into_outcome(),
                Err(_) => None,
            }
        }))
    }

    fn signal(&self, signal: Signal) -> Result<Resumption, ChainError> {
        let mut inner = self.shared.inner.lock();
        if inner.epoch != self.epoch {
            return Err(ChainError::NotPaused {
                state: inner.slot.state(),
            });
        }

        match std::mem::replace(&mut inner.slot, Slot::Running { pending: None }) {
            Slot::Parked(parked) => {
                inner.epoch += 1;
                drop(inner);
                let Parked {
                    chain, exchange, ..
                } = *parked;
                tracing::debug!(chain_id = %self.chain_id(), "Resuming paused chain");
                Ok(Resumption::Ran(chain.drive(exchange, Some(signal))))
            }
            Slot::Running { pending: None } => {
                inner.slot = Slot::Running {
                    pending: Some(signal),
                };
                Ok(Resumption::Deferred)
            }
            other => {
                let state = other.state();
                inner.slot = other;
                Err(ChainError::NotPaused { state })
            }
        }
    }
}

impl Clone for Continuation {
    fn clone(&self) -> Self {
        self.shared.inner.lock().handles += 1;
        Self {
            shared: Arc::clone(&self.shared),
            epoch: self.epoch,
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        let abandoned = {
            let mut inner = self.shared.inner.lock();
            inner.handles = inner.handles.saturating_sub(1);
            if inner.handles == 0 && matches!(inner.slot, Slot::Parked(_)) {
                inner.epoch += 1;
                Some(std::mem::replace(
                    &mut inner.slot,
                    Slot::Running { pending: None },
                ))
            } else {
                None
            }
        };

        if let Some(Slot::Parked(parked)) = abandoned {
            tracing::warn!(
                chain_id = %self.shared.chain_id(),
                "Paused chain abandoned; cancelling"
            );
            let Parked {
                chain, exchange, ..
            } = *parked;
            let _ = chain.drive(exchange, Some(Signal::Cancel(CancelReason::Abandoned)));
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("chain_id", &self.shared.chain_id())
            .field("epoch", &self.epoch)
            .field("state", &self.state())
            .finish()
    }
}

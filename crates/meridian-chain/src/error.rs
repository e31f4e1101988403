//! Errors raised while building or driving interceptor chains.
//!
//! These are configuration and misuse errors reported to the caller. Faults
//! raised by interceptors are not errors in this sense: they travel as
//! [`meridian_core::Fault`] values and end the walk as
//! [`ChainOutcome::Aborted`](crate::ChainOutcome::Aborted).

use crate::chain::ChainState;
use meridian_core::Fault;
use thiserror::Error;

/// Errors from phase registration, chain assembly and continuation handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A phase with this name was already declared.
    #[error("phase '{0}' is already declared")]
    DuplicatePhase(String),

    /// A phase name that the registry does not know.
    #[error("unknown phase '{phase}'{}", referenced(.referenced_by))]
    UnknownPhase {
        /// The missing phase.
        phase: String,
        /// The phase or interceptor that named it, if any.
        referenced_by: Option<String>,
    },

    /// The ordering constraints between phases form a cycle.
    #[error("phase ordering constraints form a cycle through: {}", .phases.join(", "))]
    PhaseCycle {
        /// Phases that could not be ordered, in declaration order.
        phases: Vec<String>,
    },

    /// More phases than a chain can index.
    #[error("too many phases: {0}")]
    TooManyPhases(usize),

    /// A resume, resume-with-fault or cancel lost the race or arrived when
    /// the chain was not waiting for one.
    #[error("chain is not paused (state: {state})")]
    NotPaused {
        /// The chain state observed by the failed request.
        state: ChainState,
    },
}

fn referenced(by: &Option<String>) -> String {
    by.as_ref()
        .map(|by| format!(" (referenced by '{by}')"))
        .unwrap_or_default()
}

impl ChainError {
    pub(crate) fn unknown_phase(phase: impl Into<String>, referenced_by: Option<&str>) -> Self {
        Self::UnknownPhase {
            phase: phase.into(),
            referenced_by: referenced_by.map(ToString::to_string),
        }
    }
}

/// Lets interceptors use `?` on chain operations such as
/// [`InterceptorContext::insert`](crate::InterceptorContext::insert).
impl From<ChainError> for Fault {
    fn from(error: ChainError) -> Self {
        Self::from_error(error)
    }
}

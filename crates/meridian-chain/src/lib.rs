//! # Meridian Chain
//!
//! Phase-ordered interceptor chains for the Meridian message bus.
//!
//! A message is processed by walking an [`InterceptorChain`]: an ordered
//! list of [`Interceptor`]s, each belonging to a named phase. The order of
//! phases comes from a [`PhaseRegistry`]; within a phase, interceptors keep
//! registration order unless they ask to run before or after one another.
//!
//! ```text
//! receive → … → unmarshal → … → pre-invoke → invoke → post-invoke
//!    ↑                                         │
//!    └──────── fault: unwind in reverse ───────┘
//! ```
//!
//! ## Chain Lifecycle
//!
//! | State | Reached when |
//! |-------|--------------|
//! | `created` | The chain was built |
//! | `executing` | A walk is in progress |
//! | `paused` | An interceptor returned [`Flow::Pause`] |
//! | `complete` | Every interceptor ran |
//! | `aborted_fault` | An interceptor returned a [`Fault`](meridian_core::Fault) |
//! | `aborted_cancel` | A paused chain was cancelled or timed out |
//!
//! A paused chain is continued through its [`Continuation`]. Of any number of
//! concurrent resume or cancel requests exactly one wins.
//!
//! ## Example
//!
//! ```
//! use meridian_chain::{ChainState, Flow, FnInterceptor, InterceptorChain, PhaseRegistry};
//! use meridian_core::{fixtures, MessageRole};
//!
//! let order = PhaseRegistry::inbound().order().unwrap();
//! let mut chain = InterceptorChain::new(order);
//! chain
//!     .add(FnInterceptor::new("invoker", "invoke", |ctx| {
//!         ctx.message_mut()?.insert("handled", true);
//!         Ok(Flow::Continue)
//!     }))
//!     .unwrap();
//!
//! let outcome = chain.do_intercept(fixtures::request_exchange("<sayHi/>"), MessageRole::In);
//! assert_eq!(outcome.state(), ChainState::Complete);
//! ```

#![doc(html_root_url = "https://docs.rs/meridian-chain/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod chain;
mod context;
mod continuation;
mod error;
mod interceptor;
pub mod interceptors;
mod observer;
pub mod phase;

pub use chain::{ChainOutcome, ChainState, InterceptorChain};
pub use context::InterceptorContext;
pub use continuation::{CancelReason, Continuation, Resumption};
pub use error::ChainError;
pub use interceptor::{Flow, FnInterceptor, Interceptor, SharedInterceptor};
pub use observer::{FaultChainObserver, FaultListener, FaultObserver, CORRELATION_ID};
pub use phase::{Phase, PhaseId, PhaseOrder, PhaseRegistry};

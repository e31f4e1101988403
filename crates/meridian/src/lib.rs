//! # Meridian
//!
//! **Protocol-agnostic message processing with phase-ordered interceptor chains**
//!
//! Meridian moves messages through chains of interceptors grouped into named
//! phases. It provides:
//!
//! - **Typed messages** – One message, many content representations, checked on access
//! - **Exchanges** – Request, response and both fault slots of one interaction
//! - **Ordered phases** – Declared with before/after constraints, resolved once
//! - **Pausable chains** – Suspend for asynchronous work, resume on any thread
//! - **Fault unwinding** – Compensation in reverse, then a fault response chain
//!
//! ## Quick Start
//!
//! ```
//! use meridian::prelude::*;
//! use meridian_core::fixtures;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ConfigLoader::new().with_defaults().load()?;
//! let bus = Bus::builder()
//!     .config(config)
//!     .inbound(FnInterceptor::new("invoker", "invoke", |ctx| {
//!         let request = ctx.message()?.id();
//!         tracing::info!(?request, "invoked");
//!         Ok(Flow::Continue)
//!     }))
//!     .build()?;
//!
//! let outcome = bus.dispatch(fixtures::request_exchange("<sayHi/>"))?;
//! assert_eq!(outcome.state(), ChainState::Complete);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! receive → … → unmarshal → … → pre-invoke → invoke → post-invoke
//!                                               │
//!                              fault ───────────┘
//!                                 ↓ unwind in reverse
//!         setup → … → marshal (fault envelope) → … → send
//! ```

#![doc(html_root_url = "https://docs.rs/meridian/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bus;
mod error;

pub use bus::{Bus, BusBuilder};
pub use error::BusError;

// Re-export the message model
pub use meridian_core as core;

// Re-export chains and interceptors
pub use meridian_chain as chain;

// Re-export configuration
pub use meridian_config as config;

// Re-export telemetry
pub use meridian_telemetry as telemetry;

/// Initializes logging, metrics and tracing as configured.
///
/// Keep the returned guard alive for the life of the process.
///
/// # Errors
///
/// Returns [`TelemetryError`](meridian_telemetry::TelemetryError) if a
/// subsystem fails to start.
pub fn init_telemetry(
    config: &meridian_config::MeridianConfig,
) -> Result<meridian_telemetry::TelemetryGuard, meridian_telemetry::TelemetryError> {
    meridian_telemetry::init_telemetry(config.to_telemetry_config())
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use meridian::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Bus, BusBuilder, BusError};

    pub use meridian_core::{
        ContentFormat, Exchange, Fault, FaultCode, FaultMode, Message, MessageRole, PropertyBag,
    };

    pub use meridian_chain::{
        CancelReason, ChainOutcome, ChainState, Continuation, Flow, FnInterceptor, Interceptor,
        InterceptorChain, InterceptorContext, Phase, PhaseRegistry,
    };

    pub use meridian_config::{ConfigLoader, MeridianConfig};
}

//! Built-in interceptors.
//!
//! Each names the phase it runs in, so they can be added to a chain built
//! from [`PhaseRegistry::inbound`](crate::PhaseRegistry::inbound) or
//! [`PhaseRegistry::outbound`](crate::PhaseRegistry::outbound) as is.
//!
//! | Interceptor | Inbound phase | Outbound phase | Purpose |
//! |---|---|---|---|
//! | [`MessageIdInterceptor`] | `receive` | `setup` | Assign message ids, correlate replies |
//! | [`TelemetryInterceptor`] | `receive` | `prepare-send` | Message metrics, trace propagation |
//! | [`LoggingInterceptor`] | `receive` | `send` | Structured message logs |
//! | [`FaultEnvelopeInterceptor`] | | `marshal` | Serialize fault messages |

pub mod fault_envelope;
pub mod logging;
pub mod message_id;
pub mod telemetry;

pub use fault_envelope::FaultEnvelopeInterceptor;
pub use logging::LoggingInterceptor;
pub use message_id::{MessageIdInterceptor, MESSAGE_ID_HEADER};
pub use telemetry::{MessageTelemetry, TelemetryInterceptor, TRACE_ID};

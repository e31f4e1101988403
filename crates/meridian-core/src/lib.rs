//! # Meridian Core
//!
//! The message data model of the Meridian interceptor pipeline.
//!
//! This crate provides the types every interceptor reads and writes:
//!
//! - [`PropertyBag`] - String-keyed and type-keyed property store
//! - [`Message`] - One directional unit of communication with a multi-format content store
//! - [`MessageContentsList`] - Positional invocation arguments with sparse removal
//! - [`Exchange`] - Correlates the in, out and fault messages of one interaction
//! - [`Fault`] / [`FaultMode`] - Classified errors that drive chain unwinding
//! - [`Conduit`], [`Destination`], [`ConduitSelector`] - Transport interfaces
//!
//! ## Ownership
//!
//! ```text
//!                  ┌──────────────────── Exchange ────────────────────┐
//!                  │ in  │ out │ in-fault │ out-fault │ properties    │
//!                  └──┬─────┬───────┬──────────┬─────────────────────┘
//!          owns ──────┘     │       │          │        weak ──► Destination
//!                           ▼       ▼          ▼        weak ──► Conduit
//!                        Message  Message   Message     weak ──► Session
//!                           │
//!                           └── ExchangeRef (id + role, non-owning)
//! ```

#![doc(html_root_url = "https://docs.rs/meridian-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bag;
mod content;
mod contents_list;
mod exchange;
mod fault;
pub mod fixtures;
mod ids;
mod message;
mod service;
pub mod transport;

pub use bag::PropertyBag;
pub use content::{ContentError, ContentFormat};
pub use contents_list::{MessageContentsList, Slot};
pub use exchange::Exchange;
pub use fault::{Fault, FaultCode, FaultDetail, FaultEnvelope, FaultMode};
pub use ids::{ChainId, ExchangeId, MessageId};
pub use message::{Attachment, ExchangeRef, Message, MessageRole, ProtocolHeaders};
pub use service::{Endpoint, OperationInfo, Service};
pub use transport::{Conduit, ConduitSelector, Destination};

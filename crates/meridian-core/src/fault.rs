//! The fault model.
//!
//! A [`Fault`] is the error value an interceptor raises to abort the chain
//! walking its message. Faults carry a human-readable message, an optional
//! structured detail payload, a [`FaultCode`] saying which side is to blame,
//! and optionally a [`FaultMode`] classifying the fault for the outbound
//! fault path.
//!
//! # Fault Modes
//!
//! | `FaultMode` | Meaning |
//! |---|---|
//! | `RuntimeFault` | Unexpected failure inside the runtime (the default) |
//! | `LogicalRuntimeFault` | Runtime failure raised by a logical handler |
//! | `CheckedApplicationFault` | A declared fault of the invoked operation |
//! | `UncheckedApplicationFault` | An undeclared failure of the invoked operation |

use crate::content::ContentError;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Classification of a fault produced on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    /// Unexpected failure inside the runtime.
    #[default]
    RuntimeFault,
    /// Runtime failure raised by a logical handler.
    LogicalRuntimeFault,
    /// A fault declared by the invoked operation.
    CheckedApplicationFault,
    /// An undeclared failure of the invoked operation.
    UncheckedApplicationFault,
}

impl FaultMode {
    /// Returns the snake_case label used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RuntimeFault => "runtime_fault",
            Self::LogicalRuntimeFault => "logical_runtime_fault",
            Self::CheckedApplicationFault => "checked_application_fault",
            Self::UncheckedApplicationFault => "unchecked_application_fault",
        }
    }

    /// Returns `true` for faults that originate in the invoked operation.
    #[must_use]
    pub const fn is_application(&self) -> bool {
        matches!(
            self,
            Self::CheckedApplicationFault | Self::UncheckedApplicationFault
        )
    }
}

/// Which party a fault is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The sender of the message is at fault.
    Client,
    /// The receiver failed to process a valid message.
    #[default]
    Server,
}

/// A classified error raised while processing a message.
///
/// # Example
///
/// ```
/// use meridian_core::{Fault, FaultCode, FaultMode};
///
/// let fault = Fault::client("missing operation name")
///     .with_mode(FaultMode::CheckedApplicationFault)
///     .with_detail(serde_json::json!({ "element": "operation" }));
///
/// assert_eq!(fault.code(), FaultCode::Client);
/// assert_eq!(fault.to_string(), "missing operation name");
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Fault {
    message: String,
    code: FaultCode,
    detail: Option<serde_json::Value>,
    mode: Option<FaultMode>,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Fault {
    /// Creates a server fault.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: FaultCode::Server,
            detail: None,
            mode: None,
            source: None,
        }
    }

    /// Creates a fault attributed to the sender.
    #[must_use]
    pub fn client(message: impl Into<String>) -> Self {
        Self {
            code: FaultCode::Client,
            ..Self::new(message)
        }
    }

    /// Creates a fault attributed to the receiver.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(message)
    }

    /// Wraps an underlying error, using its display text as the message.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let message = error.to_string();
        Self {
            source: Some(Arc::new(error)),
            ..Self::new(message)
        }
    }

    /// Attaches a structured detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Sets the fault classification.
    #[must_use]
    pub fn with_mode(mut self, mode: FaultMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the fault code.
    #[must_use]
    pub fn with_code(mut self, code: FaultCode) -> Self {
        self.code = code;
        self
    }

    /// Records the underlying cause.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Replaces the message, e.g. when an interceptor translates a fault
    /// during unwind.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// The fault code.
    #[must_use]
    pub const fn code(&self) -> FaultCode {
        self.code
    }

    /// The structured detail payload, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&serde_json::Value> {
        self.detail.as_ref()
    }

    /// Mutable access to the detail payload for annotation.
    pub fn detail_mut(&mut self) -> &mut Option<serde_json::Value> {
        &mut self.detail
    }

    /// The classification carried on the fault itself, if any.
    #[must_use]
    pub const fn mode(&self) -> Option<FaultMode> {
        self.mode
    }

    /// Converts this fault to a serializable envelope.
    #[must_use]
    pub fn to_envelope(&self, message_id: Option<&str>) -> FaultEnvelope {
        FaultEnvelope {
            fault: FaultDetail {
                code: self.code,
                message: self.message.clone(),
                mode: self.mode.unwrap_or_default(),
                detail: self.detail.clone(),
            },
            message_id: message_id.map(ToString::to_string),
        }
    }
}

impl From<ContentError> for Fault {
    fn from(error: ContentError) -> Self {
        Self::from_error(error)
    }
}

/// Serializable fault body, for the interceptor that writes the fault
/// message onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEnvelope {
    /// The fault details.
    pub fault: FaultDetail,
    /// Id of the message that faulted, for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Fault detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultDetail {
    /// Which party is at fault.
    pub code: FaultCode,
    /// Human-readable message.
    pub message: String,
    /// Classification.
    pub mode: FaultMode,
    /// Structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

//! Content format tags and the errors raised by typed content access.

use std::fmt;
use thiserror::Error;

/// Identifies one representation of a message payload.
///
/// Several formats can be present on the same message at once, for example
/// the raw bytes read off the wire alongside the parsed document built from
/// them.
///
/// The name *is* the format's identity: two formats declared with the same
/// name are the same format and share one content slot, whatever the
/// payload type. Declare each format once, as a `const`, and give formats
/// from different crates a prefix such as `"soap:envelope"`. String
/// addresses are not used because the compiler does not guarantee that one
/// literal has one address.
///
/// ```
/// use meridian_core::ContentFormat;
///
/// const SOAP_ENVELOPE: ContentFormat = ContentFormat::new("soap-envelope");
/// assert_eq!(SOAP_ENVELOPE.name(), "soap-envelope");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentFormat(&'static str);

impl ContentFormat {
    /// Raw transport bytes, as received or about to be sent.
    pub const RAW_BYTES: Self = Self("raw-bytes");
    /// Decoded text of the payload.
    pub const TEXT: Self = Self("text");
    /// A parsed document tree.
    pub const PARSED_DOCUMENT: Self = Self("parsed-document");
    /// Invocation arguments, stored as a [`MessageContentsList`](crate::MessageContentsList).
    pub const ARGUMENT_LIST: Self = Self("argument-list");
    /// The [`Fault`](crate::Fault) that aborted the chain walking this message.
    pub const FAULT: Self = Self("fault");

    /// Declares a content format.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The format's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Errors from typed access to message contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// The slot holds a value of a different type than requested.
    #[error("content format '{format}' does not hold a value of type {expected}")]
    FormatMismatch {
        /// The format that was read.
        format: ContentFormat,
        /// The requested type.
        expected: &'static str,
    },

    /// A contents list position beyond the growth limit.
    #[error("argument position {index} exceeds the limit of {limit} positions")]
    PositionOutOfRange {
        /// The requested position.
        index: usize,
        /// The most positions a list may have.
        limit: usize,
    },

    /// The message already carries a correlation id.
    #[error("message id is already set to {0}")]
    IdAlreadySet(String),
}

impl ContentError {
    /// Creates a mismatch error for reading `format` as `T`.
    #[must_use]
    pub fn mismatch<T>(format: ContentFormat) -> Self {
        Self::FormatMismatch {
            format,
            expected: std::any::type_name::<T>(),
        }
    }
}

//! The [`Message`] type.
//!
//! A message is one directional unit of an interaction: a request, a
//! response, or a fault. Its payload lives in a content store keyed by
//! [`ContentFormat`], so each interceptor can add the representation it
//! produces (bytes, then a parsed document, then bound arguments) without
//! discarding the earlier ones.

use crate::bag::PropertyBag;
use crate::content::{ContentError, ContentFormat};
use crate::ids::{ChainId, ExchangeId, MessageId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// The slot a message occupies in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The inbound message.
    In,
    /// The outbound message.
    Out,
    /// The inbound fault message.
    InFault,
    /// The outbound fault message.
    OutFault,
}

impl MessageRole {
    /// All roles in slot order.
    pub const ALL: [Self; 4] = [Self::In, Self::Out, Self::InFault, Self::OutFault];

    /// Returns `true` for messages travelling towards the transport.
    #[must_use]
    pub const fn is_outbound(&self) -> bool {
        matches!(self, Self::Out | Self::OutFault)
    }

    /// Returns `true` for the two fault slots.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::InFault | Self::OutFault)
    }

    /// The fault slot on the same side as this role.
    #[must_use]
    pub const fn fault_role(&self) -> Self {
        if self.is_outbound() {
            Self::OutFault
        } else {
            Self::InFault
        }
    }

    /// Returns the snake_case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InFault => "in_fault",
            Self::OutFault => "out_fault",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-owning link from a message to the exchange holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeRef {
    /// The owning exchange.
    pub exchange: ExchangeId,
    /// The slot the message occupies.
    pub role: MessageRole,
}

/// A side-channel binary part carried with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    id: String,
    headers: BTreeMap<String, String>,
    data: Bytes,
    xop: bool,
}

impl Attachment {
    /// Creates an attachment.
    #[must_use]
    pub fn new(id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            headers: BTreeMap::new(),
            data: data.into(),
            xop: false,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Marks the attachment as an XOP-optimized part.
    #[must_use]
    pub fn xop(mut self, xop: bool) -> Self {
        self.xop = xop;
        self
    }

    /// The content id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// All headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// The opaque payload.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the part was produced by XOP optimization.
    #[must_use]
    pub const fn is_xop(&self) -> bool {
        self.xop
    }
}

/// Transport-level headers carried with a message.
///
/// Names are matched case-insensitively; a name may carry several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolHeaders {
    entries: BTreeMap<String, Vec<String>>,
}

impl ProtocolHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all values of `name` with `value`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Adds a value to `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// The first value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of `name`.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Header names, lowercased.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One directional unit of communication.
///
/// `Message` derefs to its [`PropertyBag`], so properties are read and
/// written directly on the message.
///
/// # Example
///
/// ```
/// use meridian_core::{ContentFormat, Message};
///
/// let mut message = Message::new();
/// message.set_content(ContentFormat::RAW_BYTES, b"<a/>".to_vec());
/// message.set_content(ContentFormat::TEXT, String::from("<a/>"));
///
/// assert_eq!(message.content_formats().len(), 2);
/// assert!(message.content::<String>(ContentFormat::TEXT).unwrap().is_some());
/// assert!(message.content::<String>(ContentFormat::RAW_BYTES).is_err());
/// ```
#[derive(Default)]
pub struct Message {
    id: Option<MessageId>,
    properties: PropertyBag,
    contents: HashMap<ContentFormat, Box<dyn Any + Send + Sync>>,
    attachments: Vec<Attachment>,
    exchange: Option<ExchangeRef>,
    interceptor_chain: Option<ChainId>,
}

impl Message {
    /// Creates an empty message with no id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message holding one content representation.
    #[must_use]
    pub fn with_content<T: Any + Send + Sync>(format: ContentFormat, value: T) -> Self {
        let mut message = Self::new();
        message.set_content(format, value);
        message
    }

    /// The correlation id, if one was assigned.
    #[must_use]
    pub const fn id(&self) -> Option<MessageId> {
        self.id
    }

    /// Assigns the correlation id. An id can only be set once.
    pub fn set_id(&mut self, id: MessageId) -> Result<(), ContentError> {
        match self.id {
            Some(existing) if existing != id => Err(ContentError::IdAlreadySet(existing.to_string())),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    /// Returns the id, assigning a fresh one if none is set.
    pub fn ensure_id(&mut self) -> MessageId {
        *self.id.get_or_insert_with(MessageId::new)
    }

    /// Stores `value` under `format`, returning `true` if it replaced a
    /// previous representation.
    pub fn set_content<T: Any + Send + Sync>(&mut self, format: ContentFormat, value: T) -> bool {
        self.contents.insert(format, Box::new(value)).is_some()
    }

    /// Reads the representation stored under `format`.
    ///
    /// Returns `Ok(None)` when the format is absent and
    /// [`ContentError::FormatMismatch`] when it holds another type.
    pub fn content<T: Any>(&self, format: ContentFormat) -> Result<Option<&T>, ContentError> {
        match self.contents.get(&format) {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<T>()
                .map(Some)
                .ok_or_else(|| ContentError::mismatch::<T>(format)),
        }
    }

    /// Mutable variant of [`content`](Self::content).
    pub fn content_mut<T: Any>(
        &mut self,
        format: ContentFormat,
    ) -> Result<Option<&mut T>, ContentError> {
        match self.contents.get_mut(&format) {
            None => Ok(None),
            Some(value) => value
                .downcast_mut::<T>()
                .map(Some)
                .ok_or_else(|| ContentError::mismatch::<T>(format)),
        }
    }

    /// Removes and returns the representation under `format`.
    ///
    /// On a type mismatch the content is left in place.
    pub fn take_content<T: Any>(&mut self, format: ContentFormat) -> Result<Option<T>, ContentError> {
        match self.contents.get(&format) {
            None => return Ok(None),
            Some(value) if !value.is::<T>() => return Err(ContentError::mismatch::<T>(format)),
            Some(_) => {}
        }
        Ok(self
            .contents
            .remove(&format)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value))
    }

    /// Drops the representation under `format`, leaving the others intact.
    pub fn remove_content(&mut self, format: ContentFormat) -> bool {
        self.contents.remove(&format).is_some()
    }

    /// Returns `true` if a representation is stored under `format`.
    #[must_use]
    pub fn has_content(&self, format: ContentFormat) -> bool {
        self.contents.contains_key(&format)
    }

    /// The formats currently present, sorted by name.
    #[must_use]
    pub fn content_formats(&self) -> Vec<ContentFormat> {
        let mut formats: Vec<_> = self.contents.keys().copied().collect();
        formats.sort_unstable();
        formats
    }

    /// The attachments, in order.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Mutable access to the attachments.
    pub fn attachments_mut(&mut self) -> &mut Vec<Attachment> {
        &mut self.attachments
    }

    /// Appends an attachment.
    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// The transport headers, if any were set.
    #[must_use]
    pub fn protocol_headers(&self) -> Option<&ProtocolHeaders> {
        self.properties.get_typed::<ProtocolHeaders>()
    }

    /// The transport headers, created empty on first access.
    pub fn protocol_headers_mut(&mut self) -> &mut ProtocolHeaders {
        if !self.properties.contains_typed::<ProtocolHeaders>() {
            self.properties.put(ProtocolHeaders::new());
        }
        self.properties
            .get_typed_mut::<ProtocolHeaders>()
            .unwrap_or_else(|| unreachable!("headers were inserted above"))
    }

    /// The exchange this message belongs to.
    #[must_use]
    pub const fn exchange(&self) -> Option<ExchangeRef> {
        self.exchange
    }

    /// The slot this message occupies, if attached.
    #[must_use]
    pub fn role(&self) -> Option<MessageRole> {
        self.exchange.map(|r| r.role)
    }

    /// Returns `true` if attached to an outbound slot.
    #[must_use]
    pub fn is_outbound(&self) -> bool {
        self.role().is_some_and(|r| r.is_outbound())
    }

    /// Returns `true` if attached to a fault slot.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.role().is_some_and(|r| r.is_fault())
    }

    /// The chain currently walking this message.
    #[must_use]
    pub const fn interceptor_chain(&self) -> Option<ChainId> {
        self.interceptor_chain
    }

    /// Records which chain is walking this message. Chains set this while
    /// they execute and clear it when they pause or finish.
    pub fn set_interceptor_chain(&mut self, chain: Option<ChainId>) {
        self.interceptor_chain = chain;
    }

    pub(crate) fn attach(&mut self, link: ExchangeRef) {
        self.exchange = Some(link);
    }

    pub(crate) fn detach(&mut self) {
        self.exchange = None;
    }
}

impl Deref for Message {
    type Target = PropertyBag;

    fn deref(&self) -> &Self::Target {
        &self.properties
    }
}

impl DerefMut for Message {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.properties
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("formats", &self.content_formats())
            .field("attachments", &self.attachments.len())
            .field("exchange", &self.exchange)
            .field("interceptor_chain", &self.interceptor_chain)
            .field("properties", &self.properties)
            .finish()
    }
}

//! The [`Exchange`] type.
//!
//! An exchange correlates every message of one logical interaction. It owns
//! the messages; each message points back at it through a non-owning
//! [`ExchangeRef`]. Transport endpoints and the session are held weakly and
//! are released by [`Exchange::clear`].

use crate::bag::PropertyBag;
use crate::fault::FaultMode;
use crate::ids::ExchangeId;
use crate::message::{ExchangeRef, Message, MessageRole};
use crate::service::{Endpoint, OperationInfo, Service};
use crate::transport::{Conduit, ConduitSelector, Destination};
use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

/// Correlator of the messages belonging to one interaction.
///
/// # Example
///
/// ```
/// use meridian_core::{Exchange, Message, MessageRole};
///
/// let mut exchange = Exchange::new();
/// exchange.set_in_message(Message::new());
///
/// let link = exchange.in_message().unwrap().exchange().unwrap();
/// assert_eq!(link.exchange, exchange.id());
/// assert_eq!(link.role, MessageRole::In);
/// ```
pub struct Exchange {
    id: ExchangeId,
    properties: PropertyBag,
    in_message: Option<Message>,
    out_message: Option<Message>,
    in_fault_message: Option<Message>,
    out_fault_message: Option<Message>,
    one_way: bool,
    synchronous: bool,
    destination: Option<Weak<dyn Destination>>,
    conduit: Option<Weak<dyn Conduit>>,
    session: Option<Weak<dyn Any + Send + Sync>>,
    operation: Option<Arc<OperationInfo>>,
    endpoint: Option<Arc<Endpoint>>,
    service: Option<Arc<Service>>,
}

impl Exchange {
    /// Creates an empty exchange.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ExchangeId::new(),
            properties: PropertyBag::new(),
            in_message: None,
            out_message: None,
            in_fault_message: None,
            out_fault_message: None,
            one_way: false,
            synchronous: true,
            destination: None,
            conduit: None,
            session: None,
            operation: None,
            endpoint: None,
            service: None,
        }
    }

    /// This exchange's id.
    #[must_use]
    pub const fn id(&self) -> ExchangeId {
        self.id
    }

    fn slot(&self, role: MessageRole) -> &Option<Message> {
        match role {
            MessageRole::In => &self.in_message,
            MessageRole::Out => &self.out_message,
            MessageRole::InFault => &self.in_fault_message,
            MessageRole::OutFault => &self.out_fault_message,
        }
    }

    fn slot_mut(&mut self, role: MessageRole) -> &mut Option<Message> {
        match role {
            MessageRole::In => &mut self.in_message,
            MessageRole::Out => &mut self.out_message,
            MessageRole::InFault => &mut self.in_fault_message,
            MessageRole::OutFault => &mut self.out_fault_message,
        }
    }

    /// The message in `role`'s slot.
    #[must_use]
    pub fn message(&self, role: MessageRole) -> Option<&Message> {
        self.slot(role).as_ref()
    }

    /// Mutable access to the message in `role`'s slot.
    pub fn message_mut(&mut self, role: MessageRole) -> Option<&mut Message> {
        self.slot_mut(role).as_mut()
    }

    /// Attaches `message` to `role`'s slot and links it back to this
    /// exchange. A message previously in the slot is detached and returned.
    pub fn set_message(&mut self, role: MessageRole, mut message: Message) -> Option<Message> {
        message.attach(ExchangeRef {
            exchange: self.id,
            role,
        });
        let previous = self.slot_mut(role).replace(message);
        previous.map(|mut old| {
            old.detach();
            old
        })
    }

    /// Detaches and returns the message in `role`'s slot.
    pub fn take_message(&mut self, role: MessageRole) -> Option<Message> {
        self.slot_mut(role).take().map(|mut message| {
            message.detach();
            message
        })
    }

    /// The inbound message.
    #[must_use]
    pub fn in_message(&self) -> Option<&Message> {
        self.in_message.as_ref()
    }

    /// The outbound message.
    #[must_use]
    pub fn out_message(&self) -> Option<&Message> {
        self.out_message.as_ref()
    }

    /// The inbound fault message.
    #[must_use]
    pub fn in_fault_message(&self) -> Option<&Message> {
        self.in_fault_message.as_ref()
    }

    /// The outbound fault message.
    #[must_use]
    pub fn out_fault_message(&self) -> Option<&Message> {
        self.out_fault_message.as_ref()
    }

    /// Attaches the inbound message.
    pub fn set_in_message(&mut self, message: Message) -> Option<Message> {
        self.set_message(MessageRole::In, message)
    }

    /// Attaches the outbound message.
    pub fn set_out_message(&mut self, message: Message) -> Option<Message> {
        self.set_message(MessageRole::Out, message)
    }

    /// Attaches the inbound fault message.
    pub fn set_in_fault_message(&mut self, message: Message) -> Option<Message> {
        self.set_message(MessageRole::InFault, message)
    }

    /// Attaches the outbound fault message.
    pub fn set_out_fault_message(&mut self, message: Message) -> Option<Message> {
        self.set_message(MessageRole::OutFault, message)
    }

    /// Whether no response is expected.
    #[must_use]
    pub const fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Sets the one-way flag.
    pub fn set_one_way(&mut self, one_way: bool) {
        self.one_way = one_way;
    }

    /// Whether the caller blocks for the response. Defaults to `true`.
    #[must_use]
    pub const fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Sets the synchronous flag.
    pub fn set_synchronous(&mut self, synchronous: bool) {
        self.synchronous = synchronous;
    }

    /// The receiving endpoint, if it is still alive.
    #[must_use]
    pub fn destination(&self) -> Option<Arc<dyn Destination>> {
        self.destination.as_ref().and_then(Weak::upgrade)
    }

    /// Records the receiving endpoint without taking ownership.
    pub fn set_destination(&mut self, destination: &Arc<dyn Destination>) {
        self.destination = Some(Arc::downgrade(destination));
    }

    /// Records the sending endpoint without taking ownership.
    pub fn set_conduit(&mut self, conduit: &Arc<dyn Conduit>) {
        self.conduit = Some(Arc::downgrade(conduit));
    }

    /// Installs the selector used to resolve the conduit lazily.
    pub fn set_conduit_selector(&mut self, selector: Arc<dyn ConduitSelector>) {
        self.properties.put(selector);
    }

    /// The installed conduit selector.
    #[must_use]
    pub fn conduit_selector(&self) -> Option<Arc<dyn ConduitSelector>> {
        self.properties
            .get_typed::<Arc<dyn ConduitSelector>>()
            .cloned()
    }

    /// Returns the sending endpoint.
    ///
    /// A cached conduit that is still alive wins. Otherwise the conduit
    /// selector from the property bag is consulted and its choice is cached
    /// weakly. Returns `None` when neither yields a conduit.
    pub fn conduit(&mut self) -> Option<Arc<dyn Conduit>> {
        if let Some(conduit) = self.conduit.as_ref().and_then(Weak::upgrade) {
            return Some(conduit);
        }
        let selector = self.conduit_selector()?;
        let conduit = selector.select(self)?;
        tracing::debug!(
            exchange_id = %self.id,
            target = conduit.target(),
            "Resolved conduit through selector"
        );
        self.conduit = Some(Arc::downgrade(&conduit));
        Some(conduit)
    }

    /// The transport session, if it is still alive.
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.session.as_ref().and_then(Weak::upgrade)
    }

    /// Records the transport session without taking ownership.
    pub fn set_session(&mut self, session: &Arc<dyn Any + Send + Sync>) {
        self.session = Some(Arc::downgrade(session));
    }

    /// The operation being invoked.
    #[must_use]
    pub fn operation(&self) -> Option<&Arc<OperationInfo>> {
        self.operation.as_ref()
    }

    /// Sets the operation being invoked.
    pub fn set_operation(&mut self, operation: Arc<OperationInfo>) {
        self.operation = Some(operation);
    }

    /// The target endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    /// Sets the target endpoint.
    pub fn set_endpoint(&mut self, endpoint: Arc<Endpoint>) {
        self.endpoint = Some(endpoint);
    }

    /// The target service.
    #[must_use]
    pub fn service(&self) -> Option<&Arc<Service>> {
        self.service.as_ref()
    }

    /// Sets the target service.
    pub fn set_service(&mut self, service: Arc<Service>) {
        self.service = Some(service);
    }

    /// Property bags consulted by contextual lookup for `role`, most
    /// specific first.
    fn property_layers(&self, role: MessageRole) -> impl Iterator<Item = &PropertyBag> {
        let message = self.message(role).map(Deref::deref);
        let operation = self.operation.as_deref().map(Deref::deref);
        let endpoint = self.endpoint.as_deref().map(Deref::deref);
        let service = self.service.as_deref().map(Deref::deref);
        message
            .into_iter()
            .chain(std::iter::once(&self.properties))
            .chain(operation)
            .chain(endpoint)
            .chain(service)
    }

    /// Resolves `key` for the message in `role`'s slot.
    ///
    /// Checks the message, then this exchange, then the operation, the
    /// endpoint and the service. The first layer that defines `key` decides:
    /// if its value is of another type the result is `None`, and less
    /// specific layers are not consulted.
    #[must_use]
    pub fn contextual_property<T: Any>(&self, role: MessageRole, key: &str) -> Option<&T> {
        self.property_layers(role)
            .find(|bag| bag.contains_key(key))
            .and_then(|bag| bag.get::<T>(key))
    }

    /// Resolves `key` as a flag. The first layer that defines `key` decides.
    #[must_use]
    pub fn contextual_is_true(&self, role: MessageRole, key: &str) -> bool {
        self.property_layers(role)
            .find(|bag| bag.contains_key(key))
            .is_some_and(|bag| bag.is_true(key))
    }

    /// Resolves a type-keyed property with the same layering.
    #[must_use]
    pub fn contextual_typed<T: Any>(&self, role: MessageRole) -> Option<&T> {
        self.property_layers(role).find_map(PropertyBag::get_typed::<T>)
    }

    /// The [`FaultMode`] recorded on the fault message in `role`'s slot.
    ///
    /// For the outbound fault message an unset mode reads as
    /// [`FaultMode::RuntimeFault`]. For every other slot only an explicitly
    /// stored mode is returned.
    #[must_use]
    pub fn fault_mode(&self, role: MessageRole) -> Option<FaultMode> {
        let message = self.message(role)?;
        let mode = message.get_typed::<FaultMode>().copied();
        match role {
            MessageRole::OutFault => Some(mode.unwrap_or_default()),
            _ => mode,
        }
    }

    /// Resets the exchange for reuse.
    ///
    /// All four messages are dropped, the flags return to their defaults,
    /// the destination, conduit, session and metadata are released and the
    /// property bag is emptied. The id is kept.
    pub fn clear(&mut self) {
        for role in MessageRole::ALL {
            drop(self.take_message(role));
        }
        self.one_way = false;
        self.synchronous = true;
        self.destination = None;
        self.conduit = None;
        self.session = None;
        self.operation = None;
        self.endpoint = None;
        self.service = None;
        self.properties.clear();
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Exchange {
    type Target = PropertyBag;

    fn deref(&self) -> &Self::Target {
        &self.properties
    }
}

impl DerefMut for Exchange {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.properties
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<MessageRole> = MessageRole::ALL
            .into_iter()
            .filter(|role| self.slot(*role).is_some())
            .collect();
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("messages", &roles)
            .field("one_way", &self.one_way)
            .field("synchronous", &self.synchronous)
            .field("operation", &self.operation.as_ref().map(|o| o.name()))
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

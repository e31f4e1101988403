//! Test fixtures for Meridian development and testing.
//!
//! Pre-built metadata, exchanges and transport doubles shared by the tests
//! of every crate in the workspace.
//!
//! # Example
//!
//! ```
//! use meridian_core::{fixtures, ContentFormat, MessageRole};
//!
//! let exchange = fixtures::request_exchange("<sayHi/>");
//! let message = exchange.message(MessageRole::In).unwrap();
//! assert!(message.has_content(ContentFormat::RAW_BYTES));
//! assert_eq!(exchange.operation().unwrap().name(), "sayHi");
//! ```

use crate::exchange::Exchange;
use crate::fault::Fault;
use crate::message::Message;
use crate::service::{Endpoint, OperationInfo, Service};
use crate::transport::{Conduit, Destination};
use crate::{ContentFormat, MessageId};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// A greeter service with schema validation disabled.
#[must_use]
pub fn greeter_service() -> Arc<Service> {
    Arc::new(Service::new("GreeterService").property("schema-validation", false))
}

/// The SOAP port of the greeter service.
#[must_use]
pub fn greeter_endpoint() -> Arc<Endpoint> {
    Arc::new(
        Endpoint::new("GreeterPort")
            .property("address", "local://greeter")
            .property("schema-validation", true),
    )
}

/// The two-way `sayHi` operation.
#[must_use]
pub fn say_hi_operation() -> Arc<OperationInfo> {
    Arc::new(OperationInfo::new("sayHi").property("soap-action", "urn:greeter:sayHi"))
}

/// The one-way `greetMeOneWay` operation.
#[must_use]
pub fn greet_one_way_operation() -> Arc<OperationInfo> {
    Arc::new(OperationInfo::new("greetMeOneWay").property("one-way", true))
}

/// An exchange whose inbound message carries `payload` as raw bytes,
/// addressed to `sayHi` on the greeter endpoint.
#[must_use]
pub fn request_exchange(payload: &str) -> Exchange {
    let mut exchange = Exchange::new();
    exchange.set_service(greeter_service());
    exchange.set_endpoint(greeter_endpoint());
    exchange.set_operation(say_hi_operation());
    exchange.set_in_message(Message::with_content(
        ContentFormat::RAW_BYTES,
        Bytes::copy_from_slice(payload.as_bytes()),
    ));
    exchange
}

/// An exchange with an outbound message carrying `payload` as text.
#[must_use]
pub fn response_exchange(payload: &str) -> Exchange {
    let mut exchange = request_exchange("<sayHi/>");
    exchange.set_out_message(Message::with_content(
        ContentFormat::TEXT,
        payload.to_string(),
    ));
    exchange
}

/// A conduit that records the ids of the messages it prepares.
#[derive(Debug, Default)]
pub struct RecordingConduit {
    target: String,
    prepared: Mutex<Vec<Option<MessageId>>>,
}

impl RecordingConduit {
    /// Creates a conduit sending to `target`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            prepared: Mutex::new(Vec::new()),
        }
    }

    /// Ids of the messages prepared so far, in order.
    #[must_use]
    pub fn prepared(&self) -> Vec<Option<MessageId>> {
        self.prepared.lock().clone()
    }
}

impl Conduit for RecordingConduit {
    fn target(&self) -> &str {
        &self.target
    }

    fn prepare(&self, message: &mut Message) -> Result<(), Fault> {
        self.prepared.lock().push(message.id());
        Ok(())
    }
}

/// A destination with a fixed address.
#[derive(Debug)]
pub struct LoopbackDestination(pub String);

impl Destination for LoopbackDestination {
    fn address(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    #[test]
    fn test_request_exchange() {
        let exchange = request_exchange("<a/>");
        let message = exchange.message(MessageRole::In).unwrap();
        let bytes = message
            .content::<Bytes>(ContentFormat::RAW_BYTES)
            .unwrap()
            .unwrap();
        assert_eq!(&bytes[..], b"<a/>");
        assert!(exchange.contextual_is_true(MessageRole::In, "schema-validation"));
    }

    #[test]
    fn test_response_exchange_has_both_directions() {
        let exchange = response_exchange("<hi/>");
        assert!(exchange.in_message().is_some());
        assert!(exchange.out_message().is_some());
    }

    #[test]
    fn test_recording_conduit() {
        let conduit = RecordingConduit::new("local://peer");
        let mut message = Message::new();
        let id = message.ensure_id();
        conduit.prepare(&mut message).unwrap();
        assert_eq!(conduit.prepared(), vec![Some(id)]);
        assert_eq!(conduit.target(), "local://peer");
    }
}

//! Service, endpoint and operation metadata.
//!
//! These are read-only descriptions shared by every exchange that targets
//! them. Each carries a [`PropertyBag`] that takes part in contextual
//! property lookup, after the message and the exchange.

use crate::bag::PropertyBag;
use std::any::Any;
use std::ops::Deref;

macro_rules! metadata {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            name: String,
            properties: PropertyBag,
        }

        impl $name {
            /// Creates an entry with no properties.
            #[must_use]
            pub fn new(name: impl Into<String>) -> Self {
                Self {
                    name: name.into(),
                    properties: PropertyBag::new(),
                }
            }

            /// Adds a property.
            #[must_use]
            pub fn property<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
                self.properties.insert(key, value);
                self
            }

            /// Adds a type-keyed property.
            #[must_use]
            pub fn typed<T: Any + Send + Sync>(mut self, value: T) -> Self {
                self.properties.put(value);
                self
            }

            /// The qualified name.
            #[must_use]
            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl Deref for $name {
            type Target = PropertyBag;

            fn deref(&self) -> &Self::Target {
                &self.properties
            }
        }
    };
}

metadata! {
    /// The service an exchange is addressed to.
    Service
}

metadata! {
    /// A concrete endpoint of a [`Service`].
    ///
    /// ```
    /// use meridian_core::Endpoint;
    ///
    /// let endpoint = Endpoint::new("GreeterPort").property("schema-validation", true);
    /// assert_eq!(endpoint.name(), "GreeterPort");
    /// assert!(endpoint.is_true("schema-validation"));
    /// ```
    Endpoint
}

metadata! {
    /// The operation being invoked.
    OperationInfo
}

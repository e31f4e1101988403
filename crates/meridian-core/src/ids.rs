//! Identifier types.
//!
//! All identifiers are UUID v7, so they are time-ordered and sort in
//! creation order in logs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new unique identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Correlation identifier of a [`Message`](crate::Message).
    ///
    /// ```
    /// use meridian_core::MessageId;
    ///
    /// let id = MessageId::new();
    /// let parsed: MessageId = id.to_string().parse().unwrap();
    /// assert_eq!(id, parsed);
    /// ```
    MessageId
}

uuid_id! {
    /// Identifier of an [`Exchange`](crate::Exchange), used as the message
    /// back-reference.
    ExchangeId
}

uuid_id! {
    /// Identifier of an interceptor chain instance.
    ChainId
}

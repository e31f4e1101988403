//! The property bag shared by [`Message`](crate::Message) and
//! [`Exchange`](crate::Exchange).
//!
//! A [`PropertyBag`] is two stores in one: a string-keyed map for
//! conventionally named properties and a type-keyed map for capabilities that
//! are looked up by what they are rather than what they are called. The two
//! never collide, so `"conduit.selector"` and `Arc<dyn ConduitSelector>` can
//! coexist without one shadowing the other.
//!
//! # Example
//!
//! ```
//! use meridian_core::PropertyBag;
//!
//! struct Deadline(u64);
//!
//! let mut bag = PropertyBag::new();
//! bag.insert("mtom-enabled", "true");
//! bag.put(Deadline(30));
//!
//! assert!(bag.is_true("mtom-enabled"));
//! assert_eq!(bag.get_typed::<Deadline>().map(|d| d.0), Some(30));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

type Value = Box<dyn Any + Send + Sync>;

/// A string-keyed and type-keyed property store.
#[derive(Default)]
pub struct PropertyBag {
    named: HashMap<String, Value>,
    typed: HashMap<TypeId, Value>,
}

impl PropertyBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under a string key, returning `true` if a previous
    /// value was replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.named.insert(key.into(), Box::new(value)).is_some()
    }

    /// Returns the value under `key` if it is present and of type `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.named.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to the value under `key` if it is of type `T`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.named.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Returns a string property stored either as `String` or `&'static str`.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        let value = self.named.get(key)?;
        value
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| value.downcast_ref::<&'static str>().copied())
    }

    /// Interprets the property under `key` as a flag.
    ///
    /// A flag is set when stored as `true` or as a string equal to `"true"`
    /// (ignoring case). Anything else, including absence, reads as unset.
    #[must_use]
    pub fn is_true(&self, key: &str) -> bool {
        if let Some(flag) = self.get::<bool>(key) {
            return *flag;
        }
        self.get_string(key)
            .is_some_and(|s| s.eq_ignore_ascii_case("true"))
    }

    /// Removes and returns the value under `key` if it is of type `T`.
    ///
    /// A value of a different type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.named.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.named
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Removes the value under `key` whatever its type.
    pub fn discard(&mut self, key: &str) -> bool {
        self.named.remove(key).is_some()
    }

    /// Returns `true` if anything is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.named.contains_key(key)
    }

    /// Iterates over the string keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    /// Stores a value in the slot for its own type.
    pub fn put<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.typed
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Returns the value in the slot for `T`.
    #[must_use]
    pub fn get_typed<T: Any>(&self) -> Option<&T> {
        self.typed
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to the value in the slot for `T`.
    pub fn get_typed_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.typed
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes and returns the value in the slot for `T`.
    pub fn remove_typed<T: Any>(&mut self) -> Option<T> {
        self.typed
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Returns `true` if the slot for `T` is occupied.
    #[must_use]
    pub fn contains_typed<T: Any>(&self) -> bool {
        self.typed.contains_key(&TypeId::of::<T>())
    }

    /// Total number of entries across both maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.named.len() + self.typed.len()
    }

    /// Returns `true` if both maps are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.typed.is_empty()
    }

    /// Empties both maps.
    pub fn clear(&mut self) {
        self.named.clear();
        self.typed.clear();
    }
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("PropertyBag")
            .field("keys", &keys)
            .field("typed_count", &self.typed.len())
            .finish()
    }
}

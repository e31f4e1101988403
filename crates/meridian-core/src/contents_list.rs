//! Positional invocation arguments with sparse removal.

use crate::ContentError;
use std::any::Any;
use std::fmt;

/// One argument position in a [`MessageContentsList`].
pub enum Slot {
    /// A present argument value.
    Value(Box<dyn Any + Send + Sync>),
    /// An argument that is explicitly null.
    Empty,
    /// A position whose value was removed or never written.
    Removed,
}

impl Slot {
    /// Returns `true` for the removed marker.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Empty => f.write_str("Empty"),
            Self::Removed => f.write_str("Removed"),
        }
    }
}

/// Ordered invocation arguments indexed by parameter position.
///
/// Removing a slot never shifts the ones after it; the slot is overwritten
/// with [`Slot::Removed`] so every other argument keeps its index. Writing
/// past the end grows the list and fills the gap with the removed marker,
/// up to [`MAX_POSITIONS`](Self::MAX_POSITIONS).
///
/// ```
/// use meridian_core::MessageContentsList;
///
/// let mut args = MessageContentsList::new();
/// args.set(2, "third")?;
///
/// assert_eq!(args.len(), 3);
/// assert!(args.is_removed(0));
/// assert_eq!(args.get::<&str>(2), Some(&"third"));
/// # Ok::<(), meridian_core::ContentError>(())
/// ```
#[derive(Debug, Default)]
pub struct MessageContentsList {
    slots: Vec<Slot>,
}

impl MessageContentsList {
    /// Most positions a list grows to by writing past its end.
    pub const MAX_POSITIONS: usize = 1 << 16;

    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions, removed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the list has no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Appends an argument.
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.slots.push(Slot::Value(Box::new(value)));
    }

    /// Writes position `index`, growing the list as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::PositionOutOfRange`] if growing would exceed
    /// [`MAX_POSITIONS`](Self::MAX_POSITIONS).
    pub fn set<T: Any + Send + Sync>(&mut self, index: usize, value: T) -> Result<(), ContentError> {
        self.set_slot(index, Slot::Value(Box::new(value)))
    }

    /// Writes an explicit null at position `index`.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn set_empty(&mut self, index: usize) -> Result<(), ContentError> {
        self.set_slot(index, Slot::Empty)
    }

    fn set_slot(&mut self, index: usize, slot: Slot) -> Result<(), ContentError> {
        if let Some(existing) = self.slots.get_mut(index) {
            *existing = slot;
            return Ok(());
        }
        let len = index
            .checked_add(1)
            .filter(|len| *len <= Self::MAX_POSITIONS)
            .ok_or(ContentError::PositionOutOfRange {
                index,
                limit: Self::MAX_POSITIONS,
            })?;
        self.slots.resize_with(len - 1, || Slot::Removed);
        self.slots.push(slot);
        Ok(())
    }

    /// Reads position `index` as `T`.
    ///
    /// Removed, empty, out-of-range and differently typed positions all read
    /// as absent.
    #[must_use]
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        match self.slots.get(index)? {
            Slot::Value(v) => v.downcast_ref::<T>(),
            Slot::Empty | Slot::Removed => None,
        }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut<T: Any>(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index)? {
            Slot::Value(v) => v.downcast_mut::<T>(),
            Slot::Empty | Slot::Removed => None,
        }
    }

    /// Returns the raw slot at `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Marks position `index` as removed, returning `true` if it held a
    /// value or an explicit null. The length is unchanged.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.is_removed() => {
                *slot = Slot::Removed;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if position `index` holds the removed marker.
    #[must_use]
    pub fn is_removed(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Slot::is_removed)
    }

    /// Iterates over all positions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_beyond_end_backfills_removed() {
        let mut list = MessageContentsList::new();
        list.set(5, 50_i32).unwrap();

        assert_eq!(list.len(), 6);
        for i in 0..5 {
            assert!(list.is_removed(i), "slot {i} should be removed");
            assert!(list.get::<i32>(i).is_none());
        }
        assert_eq!(list.get::<i32>(5), Some(&50));
    }

    #[test]
    fn test_remove_keeps_positions() {
        let mut list = MessageContentsList::new();
        for i in 0..6 {
            list.set(i, i * 10).unwrap();
        }

        assert!(list.remove(2));
        assert_eq!(list.len(), 6);
        assert!(list.get::<usize>(2).is_none());
        for i in [0, 1, 3, 4, 5] {
            assert_eq!(list.get::<usize>(i), Some(&(i * 10)));
        }
    }

    #[test]
    fn test_set_rejects_positions_past_the_limit() {
        let mut list = MessageContentsList::new();
        let last = MessageContentsList::MAX_POSITIONS - 1;

        assert_eq!(
            list.set(usize::MAX, 1_u8),
            Err(ContentError::PositionOutOfRange {
                index: usize::MAX,
                limit: MessageContentsList::MAX_POSITIONS,
            })
        );
        assert!(list.set_empty(last + 1).is_err());
        assert!(list.is_empty());

        list.set(last, 1_u8).unwrap();
        assert_eq!(list.len(), MessageContentsList::MAX_POSITIONS);
        list.set(0, 2_u8).unwrap();
        assert_eq!(list.get::<u8>(0), Some(&2));
    }

    #[test]
    fn test_remove_twice_reports_false() {
        let mut list = MessageContentsList::new();
        list.push("a");
        assert!(list.remove(0));
        assert!(!list.remove(0));
        assert!(!list.remove(9));
    }

    #[test]
    fn test_empty_is_not_removed() {
        let mut list = MessageContentsList::new();
        list.set_empty(1).unwrap();

        assert!(list.is_removed(0));
        assert!(!list.is_removed(1));
        assert!(matches!(list.slot(1), Some(Slot::Empty)));
        assert!(list.get::<String>(1).is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_removal_never_shifts(
            len in 1_usize..24,
            removed in proptest::collection::btree_set(0_usize..24, 0..8),
        ) {
            let mut list = MessageContentsList::new();
            for i in 0..len {
                list.set(i, i).unwrap();
            }
            for &i in &removed {
                list.remove(i);
            }

            proptest::prop_assert_eq!(list.len(), len);
            for i in 0..len {
                if removed.contains(&i) {
                    proptest::prop_assert!(list.get::<usize>(i).is_none());
                } else {
                    proptest::prop_assert_eq!(list.get::<usize>(i), Some(&i));
                }
            }
        }
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut list = MessageContentsList::new();
        list.push(String::from("a"));
        list.get_mut::<String>(0).unwrap().push('b');
        assert_eq!(list.get::<String>(0).map(String::as_str), Some("ab"));
    }
}

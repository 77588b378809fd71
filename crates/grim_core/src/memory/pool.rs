//! # Slot Pool
//!
//! Fixed-capacity storage addressed by stable [`SlotId`]s.

use super::slots::{SlotAllocator, SlotId};

/// A pool of `T` addressed by stable slot ids.
///
/// Inserting and removing are O(1). A removed slot is recycled by a later
/// insert, but ids of other live entries never change, so links stored as
/// slot ids stay valid across removals.
///
/// Every mutation bumps [`SlotPool::revision`]. Owners compare revisions to
/// decide whether a GPU copy is stale.
///
/// # Example
///
/// ```rust
/// use grim_core::SlotPool;
///
/// let mut pool: SlotPool<&str> = SlotPool::new(8);
/// let before = pool.revision();
/// let id = pool.insert("batch").unwrap();
/// assert!(pool.revision() > before);
/// assert_eq!(pool.remove(id), Some("batch"));
/// ```
#[derive(Debug, Clone)]
pub struct SlotPool<T> {
    /// Id bookkeeping.
    slots: SlotAllocator,
    /// Entries, indexed by slot id.
    storage: Box<[Option<T>]>,
    /// Bumped on every mutation.
    revision: u64,
}

impl<T> SlotPool<T> {
    /// Creates a pool with room for `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let storage: Vec<Option<T>> = (0..capacity).map(|_| None).collect();
        Self {
            slots: SlotAllocator::new(capacity),
            storage: storage.into_boxed_slice(),
            revision: 0,
        }
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.slots.capacity()
    }

    /// Returns the number of live entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.slots.len()
    }

    /// Returns true when the pool holds nothing.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// One past the largest slot id ever used.
    #[inline]
    #[must_use]
    pub const fn high_water(&self) -> u32 {
        self.slots.high_water()
    }

    /// Mutation counter.
    #[inline]
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Stores a value and returns its slot, or None if the pool is full.
    pub fn insert(&mut self, value: T) -> Option<SlotId> {
        let id = self.slots.allocate()?;
        self.storage[id.index()] = Some(value);
        self.revision += 1;
        Some(id)
    }

    /// Removes and returns the value at `id`.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let value = self.storage.get_mut(id.index())?.take()?;
        self.slots.free(id);
        self.revision += 1;
        Some(value)
    }

    /// Returns true if `id` holds a value.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: SlotId) -> bool {
        self.slots.is_allocated(id)
    }

    /// Gets a reference to a live entry.
    #[inline]
    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.storage.get(id.index())?.as_ref()
    }

    /// Gets a mutable reference to a live entry.
    ///
    /// Counts as a mutation for change tracking.
    #[inline]
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        let value = self.storage.get_mut(id.index())?.as_mut()?;
        self.revision += 1;
        Some(value)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        for slot in self.storage.iter_mut() {
            *slot = None;
        }
        self.slots.clear();
        self.revision += 1;
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.storage
            .iter()
            .take(self.high_water() as usize)
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|v| (SlotId::from_raw(index as u32), v))
            })
    }

    /// Flattens the pool into a dense array of `high_water()` entries.
    ///
    /// Live slots are converted with `f`; free slots get `empty`. The result
    /// is indexed by slot id and can be uploaded as-is.
    pub fn mirror<G: Copy>(&self, empty: G, f: impl Fn(&T) -> G) -> Vec<G> {
        self.storage
            .iter()
            .take(self.high_water() as usize)
            .map(|slot| slot.as_ref().map_or(empty, &f))
            .collect()
    }
}

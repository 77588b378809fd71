//! # Slot Allocator
//!
//! Hands out stable `u32` ids from a bounded range and recycles freed ones.

use crate::bitset::BitSet;

/// A stable slot index.
///
/// Slot ids are plain integers so the same value can be stored in GPU
/// buffers and followed by shaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    /// Wraps a raw index.
    #[inline]
    #[must_use]
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the index as `usize` for slice access.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bounded id allocator with a LIFO free list.
///
/// Fresh ids are handed out in ascending order. Freed ids are reused before
/// any fresh id, most recently freed first.
///
/// # Thread Safety
///
/// Not thread-safe. Wrap in a mutex when ids must be reserved from several
/// threads.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    /// Ids that were freed and can be handed out again.
    free_list: Vec<u32>,
    /// Which ids are currently reserved.
    allocated: BitSet,
    /// Next never-used id.
    next: u32,
    /// Number of reserved ids.
    live: u32,
    /// Maximum number of ids.
    capacity: u32,
}

impl SlotAllocator {
    /// Creates an allocator for ids in `0..capacity`.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        Self {
            free_list: Vec::new(),
            allocated: BitSet::new(capacity as usize),
            next: 0,
            live: 0,
            capacity,
        }
    }

    /// Returns the maximum number of ids.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the number of reserved ids.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.live
    }

    /// Returns true when no id is reserved.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// One past the largest id ever handed out.
    ///
    /// GPU mirrors of a pool only need this many entries.
    #[inline]
    #[must_use]
    pub const fn high_water(&self) -> u32 {
        self.next
    }

    /// Reserves an id, or returns None when every id is in use.
    pub fn allocate(&mut self) -> Option<SlotId> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None if self.next < self.capacity => {
                self.next += 1;
                self.next - 1
            }
            None => return None,
        };

        self.allocated.insert(index as usize);
        self.live += 1;
        Some(SlotId(index))
    }

    /// Releases an id. Returns false if it was not reserved.
    pub fn free(&mut self, id: SlotId) -> bool {
        if !self.allocated.remove(id.index()) {
            return false;
        }
        self.free_list.push(id.0);
        self.live -= 1;
        true
    }

    /// Returns true if the id is currently reserved.
    #[inline]
    #[must_use]
    pub fn is_allocated(&self, id: SlotId) -> bool {
        self.allocated.contains(id.index())
    }

    /// Releases every id and forgets the high-water mark.
    pub fn clear(&mut self) {
        self.free_list.clear();
        self.allocated.clear();
        self.next = 0;
        self.live = 0;
    }
}

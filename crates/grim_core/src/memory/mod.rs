//! # Slotted Memory
//!
//! Pre-sized slot allocation for data that is addressed by index.
//!
//! ## Design Philosophy
//!
//! Capacity is fixed when the pool is created. Slots are recycled through a
//! free list, and an id handed out stays valid until it is explicitly freed.

mod pool;
mod slots;

pub use pool::SlotPool;
pub use slots::{SlotAllocator, SlotId};

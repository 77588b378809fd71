//! # GRIM Core
//!
//! Index-addressed storage for the GPU-driven instance renderer:
//! - Stable `u32` slot ids that never move while alive
//! - Slotted pools whose contents can be flattened straight into GPU arrays
//! - Fixed-capacity bitsets that upload as `u32` words
//!
//! ## Why indices
//!
//! Linked structures (LOD lists, batch chains) are stored as slot indices into
//! flat pools. Freeing one node never invalidates its siblings, and the same
//! index is valid on the CPU and inside a compute shader.
//!
//! ## Example
//!
//! ```rust
//! use grim_core::SlotPool;
//!
//! let mut pool: SlotPool<u32> = SlotPool::new(16);
//! let a = pool.insert(7).unwrap();
//! let b = pool.insert(9).unwrap();
//! pool.remove(a);
//! assert_eq!(pool.get(b), Some(&9));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bitset;
pub mod memory;

pub use bitset::{BitSet, BitSetIter};
pub use memory::{SlotAllocator, SlotId, SlotPool};

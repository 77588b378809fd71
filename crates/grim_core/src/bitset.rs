//! # Fixed-Capacity Bitset
//!
//! Compact membership set stored as `u32` words so it can be uploaded to a
//! storage buffer and tested from WGSL without 64-bit integer support.
//!
//! ## Performance
//!
//! - Insert / remove / contains: O(1)
//! - Clear: O(n/32)
//! - Iterate: O(words + set bits), skipping empty words

/// Bits per storage word.
const WORD_BITS: usize = 32;

/// A fixed-capacity set of small integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    /// 1 = present. 32 indices per word.
    words: Vec<u32>,
    /// Capacity in indices.
    capacity: usize,
    /// Cached population count.
    count: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0u32; capacity.div_ceil(WORD_BITS)],
            capacity,
            count: 0,
        }
    }

    /// Returns the capacity in indices.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of indices present.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Returns true if no index is present.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Adds an index. Returns true if it was not already present.
    ///
    /// Indices beyond capacity are ignored.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let mask = 1u32 << (index % WORD_BITS);
        let word = &mut self.words[index / WORD_BITS];
        let was_clear = *word & mask == 0;
        *word |= mask;
        if was_clear {
            self.count += 1;
        }
        was_clear
    }

    /// Removes an index. Returns true if it was present.
    #[inline]
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let mask = 1u32 << (index % WORD_BITS);
        let word = &mut self.words[index / WORD_BITS];
        let was_set = *word & mask != 0;
        *word &= !mask;
        if was_set {
            self.count -= 1;
        }
        was_set
    }

    /// Checks membership.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        (self.words[index / WORD_BITS] >> (index % WORD_BITS)) & 1 == 1
    }

    /// Removes every index.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.count = 0;
    }

    /// Raw words, 32 indices each, lowest index in the lowest bit.
    #[inline]
    #[must_use]
    pub fn as_words(&self) -> &[u32] {
        &self.words
    }

    /// Raw words as bytes for GPU upload.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Iterates over present indices in ascending order.
    ///
    /// Uses `trailing_zeros` to skip clear bits.
    #[must_use]
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current_word: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl<'a> IntoIterator for &'a BitSet {
    type Item = usize;
    type IntoIter = BitSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over present indices.
pub struct BitSetIter<'a> {
    words: &'a [u32],
    word_idx: usize,
    current_word: u32,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit = self.current_word.trailing_zeros() as usize;
                self.current_word &= self.current_word - 1;
                return Some(self.word_idx * WORD_BITS + bit);
            }
            self.word_idx += 1;
            self.current_word = *self.words.get(self.word_idx)?;
        }
    }
}

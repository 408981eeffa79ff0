//! Identity handles for filters in the tree arena.
//!
//! A `FilterId` pairs an arena slot index with the generation the slot had
//! when the filter was inserted. Generations come from a tree-wide counter
//! that only moves forward, so a handle to a removed filter never resolves to
//! whatever later reuses its slot.

use std::fmt;

/// Generational handle into `FilterTree`'s arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId {
    index: u32,
    generation: u32,
}

impl FilterId {
    pub const INVALID: FilterId = FilterId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single word, generation in the high half.
    #[inline]
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl Default for FilterId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "FilterId(INVALID)")
        } else {
            write!(f, "FilterId({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

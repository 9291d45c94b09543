//! Generational handles

use std::fmt;

/// Compact reference to a pool-resident object
///
/// The 16-bit `index` is the part that crosses subsystem and network
/// boundaries. The `generation` is bumped every time the slot is destroyed,
/// so a handle kept past its object's lifetime is rejected instead of
/// silently addressing whatever was created in the slot afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u16,
    generation: u16,
}

impl Handle {
    /// Handle that never refers to a live object
    pub const INVALID: Handle = Handle {
        index: u16::MAX,
        generation: u16::MAX,
    };

    pub(crate) fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index (the wire-visible part of the handle)
    pub fn index(self) -> u16 {
        self.index
    }

    /// Generation of the slot when the handle was issued
    pub fn generation(self) -> u16 {
        self.generation
    }

    /// Check against [`Handle::INVALID`]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Pack into a single integer, generation in the high half
    pub fn to_bits(self) -> u32 {
        ((self.generation as u32) << 16) | self.index as u32
    }

    /// Inverse of [`Handle::to_bits`]
    pub fn from_bits(bits: u32) -> Self {
        Self {
            index: bits as u16,
            generation: (bits >> 16) as u16,
        }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}v{}", self.index, self.generation)
        } else {
            write!(f, "#invalid")
        }
    }
}

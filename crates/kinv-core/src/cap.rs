//! Capability pointers

use std::fmt;

/// Names a slot in a capability space
///
/// The value `0` is the null capability and never names a valid slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct CapPtr(pub u32);

impl CapPtr {
    /// The null capability
    pub const NULL: CapPtr = CapPtr(0);

    #[inline]
    pub const fn new(v: u32) -> Self {
        CapPtr(v)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for CapPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "CapPtr(null)")
        } else {
            write!(f, "CapPtr({:#x})", self.0)
        }
    }
}

impl From<u32> for CapPtr {
    fn from(v: u32) -> Self {
        CapPtr(v)
    }
}

/// Number of significant bits of a [`CapPtr`] used for a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CapPtrDepth(pub u8);

impl CapPtrDepth {
    /// Depth of a direct lookup in the caller's own space
    pub const DIRECT: CapPtrDepth = CapPtrDepth(32);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The slot index selected by `ptr` at this depth
    #[inline]
    pub fn index(self, ptr: CapPtr) -> Option<usize> {
        match self.0 {
            0 => None,
            32 => Some(ptr.0 as usize),
            d if d < 32 => Some((ptr.0 & ((1u32 << d) - 1)) as usize),
            _ => None,
        }
    }
}

impl Default for CapPtrDepth {
    fn default() -> Self {
        CapPtrDepth::DIRECT
    }
}

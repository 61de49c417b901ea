//! Physical Address Type
//!
//! The stub runs with the MMU off, so every address it handles is physical.
//! `PhysAddr` keeps those values apart from plain byte counts and offsets.

use core::fmt;

/// Physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Zero, which boot protocols use for "not provided".
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `self + offset`, or `None` past the top of the address space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Bytes from `base` up to `self`, or `None` if `self` lies below it.
    #[inline]
    #[must_use]
    pub const fn checked_offset_from(self, base: PhysAddr) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    /// The address as a pointer; valid while memory is identity mapped.
    #[inline]
    #[must_use]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let base = PhysAddr(0x4000_0000);
        assert_eq!(base.checked_add(0x1000), Some(PhysAddr(0x4000_1000)));
        assert_eq!(PhysAddr(u64::MAX).checked_add(1), None);
        assert_eq!(PhysAddr(0x4000_1000).checked_offset_from(base), Some(0x1000));
        assert_eq!(PhysAddr(0x3FFF_F000).checked_offset_from(base), None);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format!("{}", PhysAddr(0x8_0000)), "0x00080000");
        assert_eq!(format!("{:#x}", PhysAddr(0x1000)), "0x1000");
        assert_eq!(format!("{:?}", PhysAddr(0x1000)), "PhysAddr(0x1000)");
    }
}

//! Physical Extents
//!
//! An [`Extent`] is a `(location, size)` pair. Components have two of them:
//! the *data extent* (where the bytes sit inside the payload) and the *load
//! extent* (where they must be before execution). Reservations are extents
//! too, written as half-open ranges `[start, end)`.
//!
//! All arithmetic is checked: an extent whose end does not fit in 64 bits is
//! unrepresentable and every constructor refuses it.

use core::fmt;

use crate::addr::PhysAddr;

/// A contiguous physical range `[base, base + size)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Extent {
    base: PhysAddr,
    size: u64,
}

impl Extent {
    /// The empty extent at address zero.
    pub const EMPTY: Self = Self {
        base: PhysAddr(0),
        size: 0,
    };

    /// Create an extent, or `None` if `base + size` overflows.
    #[inline]
    #[must_use]
    pub const fn new(base: PhysAddr, size: u64) -> Option<Self> {
        match base.0.checked_add(size) {
            Some(_) => Some(Self { base, size }),
            None => None,
        }
    }

    /// Create an extent from a half-open range, or `None` if `end < start`.
    #[inline]
    #[must_use]
    pub const fn from_range(start: PhysAddr, end: PhysAddr) -> Option<Self> {
        match end.0.checked_sub(start.0) {
            Some(size) => Some(Self { base: start, size }),
            None => None,
        }
    }

    /// First byte of the extent.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    /// Length in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// One past the last byte. Never overflows by construction.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr(self.base.0 + self.size)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether `addr` lies inside the extent.
    #[inline]
    #[must_use]
    pub const fn contains_addr(&self, addr: PhysAddr) -> bool {
        addr.0 >= self.base.0 && addr.0 < self.end().0
    }

    /// Whether `other` lies entirely inside this extent.
    ///
    /// An empty `other` is contained if its base lies within `[base, end]`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, other: &Extent) -> bool {
        other.base.0 >= self.base.0 && other.end().0 <= self.end().0
    }

    /// Whether the two extents share at least one byte.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Extent) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.base.0 < other.end().0
            && other.base.0 < self.end().0
    }

    /// The same length placed at a different base, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn with_base(&self, base: PhysAddr) -> Option<Self> {
        Self::new(base, self.size)
    }

    /// Grow or shrink to `size` bytes at the same base, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn with_size(&self, size: u64) -> Option<Self> {
        Self::new(self.base, size)
    }
}

impl fmt::Debug for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extent[{:#x}..{:#x})", self.base.0, self.end().0)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}) ({:#x} bytes)", self.base.0, self.end().0, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(base: u64, size: u64) -> Extent {
        Extent::new(PhysAddr(base), size).unwrap()
    }

    #[test]
    fn test_new_rejects_overflow() {
        assert!(Extent::new(PhysAddr(u64::MAX), 1).is_none());
        assert!(Extent::new(PhysAddr(u64::MAX - 1), 1).is_some());
    }

    #[test]
    fn test_from_range() {
        let e = Extent::from_range(PhysAddr(0x8000_0000), PhysAddr(0x8001_0000)).unwrap();
        assert_eq!(e, ext(0x8000_0000, 0x1_0000));
        assert!(Extent::from_range(PhysAddr(2), PhysAddr(1)).is_none());
    }

    #[test]
    fn test_overlaps() {
        let a = ext(0x1000, 0x1000);
        assert!(a.overlaps(&ext(0x1800, 0x1000)));
        assert!(a.overlaps(&ext(0x0800, 0x1000)));
        assert!(a.overlaps(&ext(0x1100, 0x10)));
        assert!(!a.overlaps(&ext(0x2000, 0x1000)));
        assert!(!a.overlaps(&ext(0x0, 0x1000)));
        assert!(!a.overlaps(&ext(0x1800, 0)));
    }

    #[test]
    fn test_contains() {
        let ram = ext(0x8000_0000, 0x4000_0000);
        assert!(ram.contains(&ext(0x8000_0000, 0x4000_0000)));
        assert!(ram.contains(&ext(0x9000_0000, 0x1000)));
        assert!(!ram.contains(&ext(0xBFFF_F000, 0x2000)));
        assert!(!ram.contains(&ext(0x7FFF_F000, 0x2000)));
        assert!(ram.contains_addr(PhysAddr(0xBFFF_FFFF)));
        assert!(!ram.contains_addr(PhysAddr(0xC000_0000)));
    }
}

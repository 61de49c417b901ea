//! Component Loader & Relocator
//!
//! Moves component bytes from their place inside the payload to their load
//! address. Source and destination may be disjoint, identical or partially
//! overlapping; all three go through one overlap-safe move.
//!
//! Memory is reached through a [`PhysWindow`]: the RAM the stub may write,
//! viewed as bytes. A window can carry one reserved region (the stub's own
//! image, stacks and buffers) that it never hands out. Any destination
//! outside the window or touching the reserved region is refused before a
//! single byte moves.

use core::marker::PhantomData;
use core::ops::Range;
use core::ptr::NonNull;

use keel_common::{Extent, PhysAddr};

use crate::error::{Error, Result};

/// Writable physical memory, anchored at a physical base.
///
/// Slices are only formed over the spans a caller asks for, so the window
/// may surround memory that Rust code elsewhere owns as long as that memory
/// is the reserved region.
pub struct PhysWindow<'m> {
    base: PhysAddr,
    ptr: NonNull<u8>,
    len: usize,
    reserved: Extent,
    _mem: PhantomData<&'m mut [u8]>,
}

impl<'m> PhysWindow<'m> {
    /// Wrap `mem` as the bytes living at `[base, base + mem.len())`.
    pub fn new(base: PhysAddr, mem: &'m mut [u8]) -> Result<Self> {
        Extent::new(base, mem.len() as u64).ok_or(Error::OutOfBounds)?;
        Ok(Self {
            base,
            len: mem.len(),
            ptr: NonNull::from(mem).cast(),
            reserved: Extent::EMPTY,
            _mem: PhantomData,
        })
    }

    /// Build a window over raw physical memory.
    ///
    /// Address 0 cannot be part of a window.
    ///
    /// # Safety
    ///
    /// With the MMU off every address is identity mapped. The caller must
    /// ensure `extent` is RAM and that nothing outside the reserved region
    /// (see [`Self::with_reserved`]) is aliased by anything else, another
    /// window included, for the lifetime of the window.
    pub unsafe fn from_raw(extent: Extent) -> Result<PhysWindow<'static>> {
        let len = usize::try_from(extent.size()).map_err(|_| Error::OutOfBounds)?;
        let ptr = NonNull::new(extent.base().as_mut_ptr::<u8>()).ok_or(Error::OutOfBounds)?;
        Ok(PhysWindow {
            base: extent.base(),
            ptr,
            len,
            reserved: Extent::EMPTY,
            _mem: PhantomData,
        })
    }

    /// Keep `reserved` out of reach: no read, write or move may touch it.
    #[must_use]
    pub fn with_reserved(self, reserved: Extent) -> Self {
        Self { reserved, ..self }
    }

    /// Physical range covered by the window.
    #[inline]
    #[must_use]
    pub fn extent(&self) -> Extent {
        // Checked in the constructors
        Extent::new(self.base, self.len as u64).unwrap_or(Extent::EMPTY)
    }

    /// The region the window refuses to touch.
    #[inline]
    #[must_use]
    pub fn reserved(&self) -> Extent {
        self.reserved
    }

    /// Whether `extent` lies entirely inside the window and clear of the
    /// reserved region.
    #[inline]
    #[must_use]
    pub fn covers(&self, extent: &Extent) -> bool {
        self.extent().contains(extent) && !self.reserved.overlaps(extent)
    }

    fn span(&self, extent: &Extent) -> Result<Range<usize>> {
        if !self.covers(extent) {
            return Err(Error::OutOfBounds);
        }
        let start = extent.base().checked_offset_from(self.base).ok_or(Error::OutOfBounds)?;
        let start = usize::try_from(start).map_err(|_| Error::OutOfBounds)?;
        let len = usize::try_from(extent.size()).map_err(|_| Error::OutOfBounds)?;
        Ok(start..start + len)
    }

    /// Borrow the bytes of `extent`.
    pub fn bytes(&self, extent: &Extent) -> Result<&[u8]> {
        let span = self.span(extent)?;
        // SAFETY: `span` lies inside the window and outside the reserved
        // region; the borrow of `self` keeps writers away
        Ok(unsafe { core::slice::from_raw_parts(self.ptr.as_ptr().add(span.start), span.len()) })
    }

    /// Mutably borrow the bytes of `extent`.
    pub fn bytes_mut(&mut self, extent: &Extent) -> Result<&mut [u8]> {
        let span = self.span(extent)?;
        // SAFETY: As in `bytes`, with `&mut self` making the borrow unique
        Ok(unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr().add(span.start), span.len()) })
    }

    /// Overlap-safe move of `len` bytes inside the window.
    fn move_bytes(&mut self, src: &Extent, dst: &Extent) -> Result<()> {
        let from = self.span(src).map_err(|_| Error::ExtentOutOfBounds)?;
        let to = self.span(dst)?;
        // SAFETY: Both spans are inside the window and clear of the reserved
        // region; `copy` handles overlap
        unsafe {
            let base = self.ptr.as_ptr();
            core::ptr::copy(base.add(from.start), base.add(to.start), from.len());
        }
        Ok(())
    }
}

/// How a data extent relates to its load extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    Disjoint,
    Identical,
    Overlapping,
}

/// Classify a `(data, load)` pair.
#[must_use]
pub fn classify(data: &Extent, load: &Extent) -> Overlap {
    if data == load {
        Overlap::Identical
    } else if data.overlaps(load) {
        Overlap::Overlapping
    } else {
        Overlap::Disjoint
    }
}

/// Copy a component from its data extent to its load extent.
///
/// # Returns
///
/// The load address. Identical extents succeed without touching memory.
///
/// # Errors
///
/// - [`Error::SourceDestinationMismatchedSize`] if the extents differ in length
/// - [`Error::OutOfBounds`] if the destination leaves the window
/// - [`Error::ExtentOutOfBounds`] if the source leaves the window
pub fn load(window: &mut PhysWindow<'_>, data: Extent, load: Extent) -> Result<PhysAddr> {
    if data.size() != load.size() {
        return Err(Error::SourceDestinationMismatchedSize);
    }
    if !window.covers(&load) {
        log::error!("Load target {} outside RAM window {}", load, window.extent());
        return Err(Error::OutOfBounds);
    }

    match classify(&data, &load) {
        Overlap::Identical => {
            log::debug!("{} already in place", load);
        }
        kind => {
            log::debug!("Moving {} -> {} ({:?})", data, load, kind);
            window.move_bytes(&data, &load)?;
        }
    }
    Ok(load.base())
}

/// Move an already loaded kernel so it starts at `anchor`.
///
/// The kernel's early startup code computes its own position assuming it
/// runs from the first usable RAM address, so it must sit exactly there.
///
/// # Returns
///
/// The kernel's extent after relocation, equal to `kernel` if it already
/// starts at `anchor`.
pub fn relocate_kernel(window: &mut PhysWindow<'_>, kernel: Extent, anchor: PhysAddr) -> Result<Extent> {
    let target = kernel.with_base(anchor).ok_or(Error::OutOfBounds)?;
    if target == kernel {
        return Ok(kernel);
    }
    log::info!("Relocating kernel {:#x} -> {:#x}", kernel.base(), anchor);
    load(window, kernel, target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    const BASE: u64 = 0x8000_0000;

    fn ext(offset: u64, size: u64) -> Extent {
        Extent::new(PhysAddr(BASE + offset), size).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    /// Load `src` onto `dst` inside a fresh patterned window and check the
    /// destination holds the original source bytes.
    fn check_move(src: u64, dst: u64, len: u64) {
        let mut mem = pattern(0x400);
        let original = mem.clone();
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        let at = load(&mut window, ext(src, len), ext(dst, len)).unwrap();
        assert_eq!(at, PhysAddr(BASE + dst));
        let (s, d, n) = (src as usize, dst as usize, len as usize);
        assert_eq!(&mem[d..d + n], &original[s..s + n], "src {:#x} dst {:#x}", src, dst);
    }

    #[test]
    fn test_disjoint_copy() {
        check_move(0x000, 0x200, 0x100);
        check_move(0x200, 0x000, 0x100);
    }

    #[test]
    fn test_overlap_destination_after_source() {
        check_move(0x000, 0x080, 0x100);
        check_move(0x000, 0x001, 0x300);
    }

    #[test]
    fn test_overlap_destination_before_source() {
        check_move(0x080, 0x000, 0x100);
        check_move(0x001, 0x000, 0x300);
    }

    #[test]
    fn test_overlap_matches_naive_disjoint_copy() {
        for (src, dst) in [(0x100, 0x140), (0x140, 0x100), (0x100, 0x1FF), (0x1FF, 0x100)] {
            let len = 0x100;
            let source = pattern(0x400);

            // Naive copy into a separate buffer
            let mut expected = source.clone();
            let copy = source[src..src + len].to_vec();
            expected[dst..dst + len].copy_from_slice(&copy);

            let mut mem = source.clone();
            let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
            load(&mut window, ext(src as u64, len as u64), ext(dst as u64, len as u64)).unwrap();
            assert_eq!(mem, expected);
        }
    }

    #[test]
    fn test_identical_is_noop() {
        let mut mem = pattern(0x100);
        let original = mem.clone();
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        assert_eq!(classify(&ext(0x10, 0x20), &ext(0x10, 0x20)), Overlap::Identical);
        load(&mut window, ext(0x10, 0x20), ext(0x10, 0x20)).unwrap();
        assert_eq!(mem, original);
    }

    #[test]
    fn test_destination_past_window() {
        let mut mem = vec![0u8; 0x100];
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        assert_eq!(load(&mut window, ext(0, 0x20), ext(0xF0, 0x20)), Err(Error::OutOfBounds));
        let below = Extent::new(PhysAddr(BASE - 0x10), 0x20).unwrap();
        assert_eq!(load(&mut window, ext(0, 0x20), below), Err(Error::OutOfBounds));
    }

    #[test]
    fn test_source_outside_window() {
        let mut mem = vec![0u8; 0x100];
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        assert_eq!(
            load(&mut window, ext(0x100, 0x20), ext(0, 0x20)),
            Err(Error::ExtentOutOfBounds)
        );
    }

    #[test]
    fn test_reserved_region_is_never_touched() {
        let mut mem = pattern(0x400);
        let original = mem.clone();
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem)
            .unwrap()
            .with_reserved(ext(0x100, 0x100));

        assert!(!window.covers(&ext(0x180, 0x10)));
        assert!(!window.covers(&ext(0x0F0, 0x20)));
        assert!(window.covers(&ext(0x200, 0x200)));
        assert_eq!(window.bytes(&ext(0x100, 1)), Err(Error::OutOfBounds));
        assert_eq!(load(&mut window, ext(0, 0x20), ext(0x1F0, 0x20)), Err(Error::OutOfBounds));
        assert_eq!(
            load(&mut window, ext(0x100, 0x20), ext(0x300, 0x20)),
            Err(Error::ExtentOutOfBounds)
        );

        // Moves across the reserved region are fine
        load(&mut window, ext(0, 0x80), ext(0x300, 0x80)).unwrap();
        assert_eq!(&mem[0x300..0x380], &original[..0x80]);
        assert_eq!(&mem[0x100..0x200], &original[0x100..0x200]);
    }

    #[test]
    fn test_size_mismatch() {
        let mut mem = vec![0u8; 0x100];
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        assert_eq!(
            load(&mut window, ext(0, 0x20), ext(0x40, 0x21)),
            Err(Error::SourceDestinationMismatchedSize)
        );
    }

    #[test]
    fn test_relocate_kernel() {
        let mut mem = pattern(0x400);
        let original = mem.clone();
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();

        let kernel = ext(0x100, 0x80);
        let moved = relocate_kernel(&mut window, kernel, PhysAddr(BASE)).unwrap();
        assert_eq!(moved, ext(0, 0x80));
        assert_eq!(&mem[..0x80], &original[0x100..0x180]);
    }

    #[test]
    fn test_relocate_kernel_already_at_anchor() {
        let mut mem = pattern(0x100);
        let original = mem.clone();
        let mut window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        let kernel = ext(0, 0x80);
        assert_eq!(relocate_kernel(&mut window, kernel, PhysAddr(BASE)), Ok(kernel));
        assert_eq!(mem, original);
    }

    #[test]
    fn test_window_bytes() {
        let mut mem = pattern(0x100);
        let window = PhysWindow::new(PhysAddr(BASE), &mut mem).unwrap();
        assert_eq!(window.bytes(&ext(0x10, 4)).unwrap(), &pattern(0x14)[0x10..]);
        assert_eq!(window.bytes(&ext(0xFE, 4)), Err(Error::OutOfBounds));
    }
}

//! ARM64 Cache Maintenance
//!
//! The stub copies code into place with the data cache possibly on (the
//! previous stage may have left SCTLR_EL2.C set). Before the kernel runs with
//! its caches off, every byte the stub wrote must reach the Point of
//! Coherency and no stale instructions may linger.
//!
//! - **Clean**: write dirty lines to memory (DC CVAC)
//! - **Invalidate I-cache**: discard all instruction cache lines (IC IALLU)

#[cfg(target_arch = "aarch64")]
use core::arch::asm;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Cached line size, 0 until first use.
static CACHE_LINE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Line size in bytes for a `CTR_EL0.DminLine` value (log2 of words).
#[inline]
#[must_use]
pub const fn line_size_from_dminline(dmin_line: u64) -> usize {
    4 << dmin_line
}

/// `DminLine`, bits 19:16 of CTR_EL0.
#[inline]
#[must_use]
pub const fn dminline(ctr: u64) -> u64 {
    (ctr >> 16) & 0xF
}

/// Read CTR_EL0; aarch64-cpu has no accessor for it.
fn read_ctr() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        let ctr: u64;
        // SAFETY: CTR_EL0 is a read-only identification register
        unsafe {
            asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
        }
        ctr
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        unimplemented!("CTR_EL0 is only available on aarch64")
    }
}

/// Get the data cache minimum line size from CTR_EL0.
#[inline]
#[must_use]
pub fn cache_line_size() -> usize {
    let cached = CACHE_LINE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let line_size = line_size_from_dminline(dminline(read_ctr()));
    CACHE_LINE_SIZE.store(line_size, Ordering::Relaxed);
    line_size
}

/// Line-aligned `[start, end)` covering `[addr, addr + size)`.
#[inline]
#[must_use]
pub const fn line_span(addr: u64, size: u64, line: u64) -> (u64, u64) {
    let mask = line - 1;
    let start = addr & !mask;
    let end = addr.saturating_add(size).saturating_add(mask) & !mask;
    (start, end)
}

/// Clean data cache lines to the Point of Coherency
///
/// # Arguments
/// * `addr` - Physical (identity-mapped) address of the range
/// * `size` - Size of the range in bytes
pub fn clean_range(addr: u64, size: u64) {
    if size == 0 {
        return;
    }
    let line = cache_line_size() as u64;
    let (start, end) = line_span(addr, size, line);

    let mut at = start;
    while at < end {
        #[cfg(target_arch = "aarch64")]
        // SAFETY: DC CVAC only writes back lines; the range is RAM owned by
        // the stub.
        unsafe {
            asm!("dc cvac, {addr}", addr = in(reg) at, options(nostack));
        }
        at += line;
    }
    crate::cpu::dsb_sy();
}

/// Invalidate entire instruction cache
///
/// Required after copying executable code into place.
pub fn icache_invalidate_all() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: IC IALLU discards instruction cache contents only.
    unsafe {
        asm!("ic iallu", "dsb sy", "isb", options(nostack));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_size_from_dminline() {
        assert_eq!(line_size_from_dminline(4), 64);
        assert_eq!(line_size_from_dminline(3), 32);
    }

    #[test]
    fn test_dminline_field() {
        // Cortex-A72
        assert_eq!(dminline(0x8444_C004), 4);
        assert_eq!(line_size_from_dminline(dminline(0x8444_C004)), 64);
        assert_eq!(dminline(0x8003_0000), 3);
    }

    #[test]
    fn test_line_span() {
        assert_eq!(line_span(0x8000_0010, 0x20, 64), (0x8000_0000, 0x8000_0040));
        assert_eq!(line_span(0x8000_0000, 0x40, 64), (0x8000_0000, 0x8000_0040));
        assert_eq!(line_span(0x8000_003F, 2, 64), (0x8000_0000, 0x8000_0080));
    }
}

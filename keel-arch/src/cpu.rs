//! CPU Control and Information
//!
//! Core identity, exception level queries, barriers and the EL2 register
//! programming needed before dropping to EL1.

use aarch64_cpu::asm;
use aarch64_cpu::asm::barrier;
use aarch64_cpu::registers::*;

/// MPIDR_EL1 affinity fields Aff3..Aff0, as used by PSCI.
pub const MPIDR_AFFINITY_MASK: u64 = 0xFF_00FF_FFFF;

/// Affinity of the running core, in the form PSCI calls expect.
#[must_use]
pub fn mpidr() -> u64 {
    MPIDR_EL1.get() & MPIDR_AFFINITY_MASK
}

/// Exception level the core is running at.
#[must_use]
pub fn current_el() -> u8 {
    CurrentEL.read(CurrentEL::EL) as u8
}

/// Whether the EL2 stage 1 MMU is on.
#[must_use]
pub fn el2_mmu_enabled() -> bool {
    SCTLR_EL2.is_set(SCTLR_EL2::M)
}

/// Whether the EL2 data cache is on.
#[must_use]
pub fn el2_dcache_enabled() -> bool {
    SCTLR_EL2.is_set(SCTLR_EL2::C)
}

/// Milliseconds since the counter started, 0 if the frequency is unset.
#[must_use]
pub fn uptime_ms() -> u64 {
    match CNTFRQ_EL0.get() {
        0 => 0,
        freq => CNTPCT_EL0.get() / (freq / 1000).max(1),
    }
}

/// Park the core for good.
#[inline]
pub fn halt() -> ! {
    loop {
        asm::wfi();
    }
}

#[inline]
pub fn dsb_sy() {
    barrier::dsb(barrier::SY);
}

#[inline]
pub fn isb() {
    barrier::isb(barrier::SY);
}

/// EL2 configuration for dropping to a lower level
///
/// The kernel is entered at EL1 with nothing trapped to the stub: AArch64
/// EL1, physical timer and counter accessible, no FP, system register or
/// debug traps.
pub mod el2 {
    #[cfg(target_arch = "aarch64")]
    use core::arch::asm;

    use aarch64_cpu::registers::{
        CNTHCTL_EL2, CPTR_EL2, ELR_EL2, HCR_EL2, SCTLR_EL1, SPSR_EL2, VBAR_EL2, Writeable,
    };

    /// SPSR mask bits D, A, I, F (bits 9..6).
    pub const SPSR_DAIF_MASKED: u64 = 0xF << 6;

    /// SPSR M[3:0] for EL1 using SP_EL1.
    pub const SPSR_MODE_EL1H: u64 = 0b0101;

    /// SPSR M[3:0] for EL2 using SP_EL2.
    pub const SPSR_MODE_EL2H: u64 = 0b1001;

    /// SCTLR_EL1 with only its RES1 bits (29, 28, 23, 22, 20, 11) set:
    /// MMU, caches and alignment checks off, little-endian.
    pub const SCTLR_EL1_MMU_OFF: u64 = (1 << 29) | (1 << 28) | (1 << 23) | (1 << 22) | (1 << 20) | (1 << 11);

    /// SPSR value for entering `el` in handler mode with DAIF masked.
    #[must_use]
    pub const fn spsr_for(el: u8) -> Option<u64> {
        match el {
            1 => Some(SPSR_DAIF_MASKED | SPSR_MODE_EL1H),
            2 => Some(SPSR_DAIF_MASKED | SPSR_MODE_EL2H),
            _ => None,
        }
    }

    /// Program the EL2 controls the kernel runs under.
    ///
    /// # Safety
    /// Must be called from EL2.
    pub unsafe fn prepare_el1() {
        // EL1 is AArch64; set/way invalidates stay as issued
        HCR_EL2.write(HCR_EL2::RW::EL1IsAarch64 + HCR_EL2::SWIO::SET);

        // Physical counter and timer usable from EL1, no virtual offset
        CNTHCTL_EL2.write(CNTHCTL_EL2::EL1PCTEN::SET + CNTHCTL_EL2::EL1PCEN::SET);

        // FP/SIMD accesses stay at EL1
        CPTR_EL2.set(0);

        // Whatever firmware left in SCTLR_EL1, the kernel starts with the
        // MMU and caches off
        SCTLR_EL1.set(SCTLR_EL1_MMU_OFF);

        // No debug, PMU or CP15 traps, no virtual offset. MDCR_EL2,
        // CNTVOFF_EL2 and HSTR_EL2 have no accessor in aarch64-cpu
        #[cfg(target_arch = "aarch64")]
        // SAFETY: Caller guarantees we're at EL2
        unsafe {
            asm!(
                "msr mdcr_el2, xzr",
                "msr cntvoff_el2, xzr",
                "msr hstr_el2, xzr",
                options(nomem, nostack)
            );
        }
        super::isb();
    }

    /// Install the EL2 exception vector table.
    ///
    /// # Safety
    /// Must be called from EL2; `base` must be a 2KB-aligned vector table.
    #[inline]
    pub unsafe fn set_vbar(base: u64) {
        VBAR_EL2.set(base);
        super::isb();
    }

    /// Set SPSR_EL2, the state `eret` restores.
    ///
    /// # Safety
    /// Must be called from EL2.
    #[inline]
    pub unsafe fn set_spsr(value: u64) {
        SPSR_EL2.set(value);
    }

    /// Set ELR_EL2, the address `eret` jumps to.
    ///
    /// # Safety
    /// Must be called from EL2 with a valid code address.
    #[inline]
    pub unsafe fn set_elr(addr: u64) {
        ELR_EL2.set(addr);
    }

    /// Return from EL2 with `x0 = arg0` and `x1..x3` cleared.
    ///
    /// This is the arm64 Linux boot convention with `arg0` the device tree.
    ///
    /// # Safety
    /// ELR_EL2 and SPSR_EL2 must describe a valid target; the next
    /// instruction executed belongs to whatever ELR_EL2 points at.
    #[inline(always)]
    pub unsafe fn eret_with_arg(arg0: u64) -> ! {
        #[cfg(target_arch = "aarch64")]
        // SAFETY: Caller guarantees ELR/SPSR are programmed
        unsafe {
            asm!(
                "mov x1, xzr",
                "mov x2, xzr",
                "mov x3, xzr",
                "eret",
                in("x0") arg0,
                options(noreturn, nostack)
            );
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            let _ = arg0;
            unimplemented!("eret is only available on aarch64")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::el2::*;

    #[test]
    fn test_spsr_values() {
        assert_eq!(spsr_for(1), Some(0x3c5));
        assert_eq!(spsr_for(2), Some(0x3c9));
        assert_eq!(spsr_for(0), None);
        assert_eq!(spsr_for(3), None);
    }

    #[test]
    fn test_sctlr_el1_mmu_off() {
        assert_eq!(SCTLR_EL1_MMU_OFF, 0x30D0_0800);
        // M, C, I and EE clear
        for bit in [0, 2, 12, 25] {
            assert_eq!(SCTLR_EL1_MMU_OFF & (1 << bit), 0, "bit {}", bit);
        }
    }
}

//! EL2 System Registers
//!
//! Syndrome decoding for the fatal exception path and a one-shot dump of the
//! EL2 control state for the boot log.

use core::fmt;

use aarch64_cpu::registers::{CNTFRQ_EL0, HCR_EL2, MPIDR_EL1, SCTLR_EL2, VBAR_EL2};
use tock_registers::interfaces::Readable;

/// Log the EL2 control state at debug level.
pub fn log_el2_state() {
    log::debug!(
        "MPIDR={:#x} SCTLR_EL2={:#x} HCR_EL2={:#x} VBAR_EL2={:#x} CNTFRQ={}Hz",
        MPIDR_EL1.get(),
        SCTLR_EL2.get(),
        HCR_EL2.get(),
        VBAR_EL2.get(),
        CNTFRQ_EL0.get()
    );
}

/// Exception class values the stub can meet at EL2
pub mod ec {
    pub const UNKNOWN: u8 = 0x00;
    pub const WFX: u8 = 0x01;
    pub const FP_ACCESS: u8 = 0x07;
    pub const ILLEGAL_STATE: u8 = 0x0E;
    pub const HVC64: u8 = 0x16;
    pub const SMC64: u8 = 0x17;
    pub const SYSREG: u8 = 0x18;
    pub const IABT_LOWER: u8 = 0x20;
    pub const IABT_CURRENT: u8 = 0x21;
    pub const PC_ALIGN: u8 = 0x22;
    pub const DABT_LOWER: u8 = 0x24;
    pub const DABT_CURRENT: u8 = 0x25;
    pub const SP_ALIGN: u8 = 0x26;
    pub const SERROR: u8 = 0x2F;
    pub const BRK64: u8 = 0x3C;
}

/// A decoded ESR_EL2 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Syndrome(pub u64);

impl Syndrome {
    /// Exception class, ESR[31:26].
    #[inline]
    #[must_use]
    pub const fn class(self) -> u8 {
        ((self.0 >> 26) & 0x3F) as u8
    }

    /// Whether the trapped instruction was 32 bits wide, ESR[25].
    #[inline]
    #[must_use]
    pub const fn is_32bit_instruction(self) -> bool {
        self.0 & (1 << 25) != 0
    }

    /// Instruction specific syndrome, ESR[24:0].
    #[inline]
    #[must_use]
    pub const fn iss(self) -> u32 {
        (self.0 & 0x1FF_FFFF) as u32
    }

    #[must_use]
    pub const fn class_name(self) -> &'static str {
        match self.class() {
            ec::UNKNOWN => "unknown reason",
            ec::WFX => "WFI/WFE trap",
            ec::FP_ACCESS => "FP/SIMD trap",
            ec::ILLEGAL_STATE => "illegal execution state",
            ec::HVC64 => "HVC",
            ec::SMC64 => "SMC",
            ec::SYSREG => "system register trap",
            ec::IABT_LOWER => "instruction abort from lower EL",
            ec::IABT_CURRENT => "instruction abort",
            ec::PC_ALIGN => "PC misaligned",
            ec::DABT_LOWER => "data abort from lower EL",
            ec::DABT_CURRENT => "data abort",
            ec::SP_ALIGN => "SP misaligned",
            ec::SERROR => "SError",
            ec::BRK64 => "BRK",
            _ => "unhandled class",
        }
    }
}

impl fmt::Display for Syndrome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} (EC {:#04x}: {}, ISS {:#x})",
            self.0,
            self.class(),
            self.class_name(),
            self.iss()
        )
    }
}

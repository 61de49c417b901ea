//! EL2 Exception Vectors
//!
//! The stub does not expect any exception while it runs: interrupts stay
//! masked, nothing is trapped from a lower level before hand-off, and a fault
//! means a bug. Every one of the 16 vectors therefore records which entry was
//! taken, reads the syndrome registers and halts with a diagnostic.
//!
//! Once the kernel runs at EL1 these vectors remain installed; a stray HVC
//! from the kernel ends up here too.

use core::fmt;

use crate::registers::Syndrome;

/// Exception type, the position within a vector group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Sync,
    Irq,
    Fiq,
    SError,
}

/// Exception origin, the vector group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOrigin {
    /// Same exception level, SP_EL0
    CurrentSpEl0,
    /// Same exception level, SP_ELx
    CurrentSpElx,
    /// Lower exception level, AArch64
    LowerAArch64,
    /// Lower exception level, AArch32
    LowerAArch32,
}

impl fmt::Display for ExceptionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentSpEl0 => write!(f, "EL2 (SP_EL0)"),
            Self::CurrentSpElx => write!(f, "EL2 (SP_EL2)"),
            Self::LowerAArch64 => write!(f, "lower EL (AArch64)"),
            Self::LowerAArch32 => write!(f, "lower EL (AArch32)"),
        }
    }
}

/// Decode a vector index (0..16) into its origin and type.
#[must_use]
pub const fn classify_vector(index: u64) -> Option<(ExceptionOrigin, ExceptionType)> {
    let origin = match index / 4 {
        0 => ExceptionOrigin::CurrentSpEl0,
        1 => ExceptionOrigin::CurrentSpElx,
        2 => ExceptionOrigin::LowerAArch64,
        3 => ExceptionOrigin::LowerAArch32,
        _ => return None,
    };
    let kind = match index % 4 {
        0 => ExceptionType::Sync,
        1 => ExceptionType::Irq,
        2 => ExceptionType::Fiq,
        _ => ExceptionType::SError,
    };
    Some((origin, kind))
}

/// Report an exception taken at EL2 and halt.
extern "C" fn exception_report(index: u64, esr_value: u64, elr: u64, far: u64) -> ! {
    match classify_vector(index) {
        Some((origin, kind)) => log::error!("Unexpected {:?} exception from {}", kind, origin),
        None => log::error!("Unexpected exception, vector {}", index),
    }
    log::error!(
        "ESR_EL2={} ELR_EL2={:#x} FAR_EL2={:#x}",
        Syndrome(esr_value),
        elr,
        far
    );
    crate::cpu::halt()
}

/// Vector entry: record the index, join the common path.
#[cfg(target_arch = "aarch64")]
macro_rules! vector_entry {
    ($index:literal) => {
        concat!(".balign 128\n", "mov x0, #", $index, "\n", "b 3f\n")
    };
}

/// The EL2 vector table
///
/// 2KB aligned, 16 entries of 128 bytes, followed by the common path that
/// gathers ESR/ELR/FAR and calls [`exception_report`].
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".vectors")]
unsafe extern "C" fn keel_el2_vectors() {
    core::arch::naked_asm!(
        ".balign 2048",
        // Current EL with SP_EL0
        vector_entry!(0),
        vector_entry!(1),
        vector_entry!(2),
        vector_entry!(3),
        // Current EL with SP_EL2
        vector_entry!(4),
        vector_entry!(5),
        vector_entry!(6),
        vector_entry!(7),
        // Lower EL, AArch64
        vector_entry!(8),
        vector_entry!(9),
        vector_entry!(10),
        vector_entry!(11),
        // Lower EL, AArch32
        vector_entry!(12),
        vector_entry!(13),
        vector_entry!(14),
        vector_entry!(15),
        "3:",
        "mrs x1, esr_el2",
        "mrs x2, elr_el2",
        "mrs x3, far_el2",
        "b {report}",
        report = sym exception_report,
    );
}

/// Address of the EL2 vector table.
#[must_use]
pub fn vector_table() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        keel_el2_vectors as *const () as u64
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        let _ = exception_report;
        0
    }
}

/// Install the vector table in VBAR_EL2.
///
/// # Safety
/// Must be called from EL2.
pub unsafe fn init() {
    // SAFETY: Caller guarantees we're at EL2; the table is 2KB aligned.
    unsafe { crate::cpu::el2::set_vbar(vector_table()) };
}

//! Secondary Core Release
//!
//! Once the primary has committed the tree and published the
//! [`BootRecord`](crate::handoff::BootRecord), each secondary core listed in
//! the device tree is started with PSCI `CPU_ON`. Its context id is the index
//! of the stack it runs on; the entry stub switches to that stack and goes
//! straight to the hand-off sequencer. Nothing on this path parses or loads.
//!
//! A core that fails to start is logged and left off. There is no retry.

use core::cell::UnsafeCell;

use keel_pal::{Psci, PsciConduit};

use crate::config::{MAX_CPUS, PROFILE, STACK_SIZE};
use crate::error::{BootError, fatal};
use crate::handoff::{BOOT_RECORD, Handoff, HardwareLevel, RecordSlot};

/// Per-core stacks; slot 0 belongs to the primary.
#[repr(C, align(16))]
pub struct Stacks(UnsafeCell<[u8; MAX_CPUS * STACK_SIZE]>);

// SAFETY: Each core only touches its own slot, chosen before it runs any Rust
unsafe impl Sync for Stacks {}

#[unsafe(no_mangle)]
pub static KEEL_STACKS: Stacks = Stacks(UnsafeCell::new([0; MAX_CPUS * STACK_SIZE]));

/// Start every core in `cores` at `entry`.
///
/// Core `i` gets context id `i + 1`, the stack slot it will use. Cores that
/// have no slot left are skipped. Returns how many cores firmware accepted.
///
/// # Safety
///
/// `entry` must be the secondary entry stub, and the tree and kernel named by
/// the published record must be final and visible to cores with caches off.
pub unsafe fn release_secondaries<C: PsciConduit>(
    psci: &Psci<C>,
    record: &RecordSlot,
    cores: &[u64],
    entry: u64,
) -> Result<usize, BootError> {
    if record.get().is_none() {
        return Err(BootError::NotPrepared);
    }

    let mut started = 0;
    for (i, &mpidr) in cores.iter().enumerate() {
        let slot = i + 1;
        if slot >= MAX_CPUS {
            log::warn!("CPU {:#x}: no stack slot left, not started", mpidr);
            continue;
        }
        // SAFETY: Entry and record upheld by the caller
        match unsafe { psci.power_on(mpidr, entry, slot as u64) } {
            Ok(()) => {
                log::info!("CPU {:#x} released (slot {})", mpidr, slot);
                started += 1;
            }
            Err(e) => log::error!("CPU {:#x} failed to start: {}", mpidr, e),
        }
    }

    log::info!("{} of {} secondary CPUs released", started, cores.len());
    Ok(started)
}

/// Physical address secondaries are started at.
#[must_use]
pub fn secondary_entry_address() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        keel_secondary_entry as *const () as u64
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Secondary entry stub, started by PSCI with the stack slot in x0.
///
/// MMU and caches are off; the stub masks interrupts, switches to the slot's
/// stack and calls [`secondary_main`].
///
/// # Safety
/// Only PSCI may branch here, with a slot index handed out by
/// [`release_secondaries`].
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.smp")]
pub unsafe extern "C" fn keel_secondary_entry() -> ! {
    core::arch::naked_asm!(
        "msr daifset, #0xf",

        // Park anything outside the stack table
        "cmp x0, {max_cpus}",
        "b.hs 2f",

        // sp = stacks + (slot + 1) * STACK_SIZE
        "adrp x1, {stacks}",
        "add x1, x1, :lo12:{stacks}",
        "add x2, x0, #1",
        "mov x3, {stack_size}",
        "madd x1, x2, x3, x1",
        "mov sp, x1",

        "bl {main}",

        "2:",
        "wfi",
        "b 2b",

        max_cpus = const MAX_CPUS,
        stack_size = const STACK_SIZE,
        stacks = sym KEEL_STACKS,
        main = sym secondary_main,
    );
}

/// Rust side of a secondary core: follow the primary into the kernel.
///
/// # Safety
/// Must run on the stack slot `slot` with interrupts masked.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn secondary_main(slot: u64) -> ! {
    let Some(record) = BOOT_RECORD.get().copied() else {
        fatal(&BootError::NotPrepared)
    };
    log::debug!("Secondary slot {} entering hand-off", slot);

    let result = Handoff::begin(HardwareLevel, PROFILE.entry_el).and_then(|handoff| {
        // SAFETY: The record was published after the commit; the vector table
        // is linked into the stub
        unsafe {
            handoff.configure(
                keel_arch::exceptions::vector_table(),
                record.entry,
                record.tree,
                PROFILE.target_el,
            )
        }
    });
    match result {
        Ok(configured) => configured.transfer(),
        Err(e) => fatal(&e),
    }
}

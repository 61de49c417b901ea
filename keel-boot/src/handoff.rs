//! Hand-off Sequencer
//!
//! Per core: `Init -> Configured -> Transferred`. Each state is a type, so a
//! transfer can only follow a configuration, and a transfer never returns.
//!
//! - `Init`: the core runs at the level the stub expects
//! - `Configured`: vectors installed, lower level prepared, ELR/SPSR set
//! - `Transferred`: `eret` with x0 = device tree, x1..x3 = 0
//!
//! The primary reaches `Configured` only after the load pipeline and the
//! commit; secondaries go there straight from power-on with the
//! [`BootRecord`] the primary published.

use keel_arch::cpu::el2;
use keel_common::PhysAddr;
use spin::Once;

use crate::error::BootError;

/// Register-level operations the sequencer needs.
pub trait LevelControl {
    /// Exception level the core is running at.
    fn current_level(&self) -> u8;

    /// Install the vector table for the running level.
    ///
    /// # Safety
    /// `base` must be a valid vector table.
    unsafe fn install_vectors(&mut self, base: u64);

    /// Configure traps, timers and register width for the lower level.
    ///
    /// # Safety
    /// Only valid at the level the stub expects.
    unsafe fn prepare_lower_level(&mut self);

    /// Program the return address and saved state.
    ///
    /// # Safety
    /// `entry` must be executable code at the target level.
    unsafe fn set_return_state(&mut self, entry: u64, spsr: u64);

    /// Drop to the lower level with `arg0` in x0.
    ///
    /// # Safety
    /// The return state must have been programmed.
    unsafe fn eret(&mut self, arg0: u64) -> !;
}

/// The real EL2 registers.
#[derive(Debug, Default)]
pub struct HardwareLevel;

impl LevelControl for HardwareLevel {
    fn current_level(&self) -> u8 {
        keel_arch::current_el()
    }

    unsafe fn install_vectors(&mut self, base: u64) {
        // SAFETY: Forwarded from the caller
        unsafe { el2::set_vbar(base) };
    }

    unsafe fn prepare_lower_level(&mut self) {
        // SAFETY: Forwarded from the caller
        unsafe { el2::prepare_el1() };
    }

    unsafe fn set_return_state(&mut self, entry: u64, spsr: u64) {
        // SAFETY: Forwarded from the caller
        unsafe {
            el2::set_spsr(spsr);
            el2::set_elr(entry);
        }
    }

    unsafe fn eret(&mut self, arg0: u64) -> ! {
        // SAFETY: Forwarded from the caller
        unsafe { el2::eret_with_arg(arg0) }
    }
}

/// Sequencer state: level verified.
pub struct Init;

/// Sequencer state: ready to transfer.
pub struct Configured {
    entry: PhysAddr,
    tree: PhysAddr,
}

/// The hand-off sequencer for one core.
pub struct Handoff<L, S> {
    level: L,
    state: S,
}

impl<L: LevelControl> Handoff<L, Init> {
    /// Enter `Init`, checking the running level.
    pub fn begin(level: L, expected: u8) -> Result<Self, BootError> {
        let found = level.current_level();
        if found != expected {
            return Err(BootError::WrongPrivilegeLevel { expected, found });
        }
        Ok(Self { level, state: Init })
    }

    /// Enter `Configured`.
    ///
    /// # Safety
    ///
    /// `vectors` must be a valid vector table, `entry` the finalized kernel
    /// entry and `tree` the committed device tree. Nothing may modify either
    /// after this call.
    pub unsafe fn configure(
        mut self,
        vectors: u64,
        entry: PhysAddr,
        tree: PhysAddr,
        target_el: u8,
    ) -> Result<Handoff<L, Configured>, BootError> {
        let current = self.level.current_level();
        let spsr = el2::spsr_for(target_el)
            .filter(|_| target_el < current)
            .ok_or(BootError::InvalidTargetLevel(target_el))?;

        // SAFETY: Level verified in `begin`; arguments upheld by the caller
        unsafe {
            self.level.install_vectors(vectors);
            self.level.prepare_lower_level();
            self.level.set_return_state(entry.as_u64(), spsr);
        }
        log::debug!(
            "Configured: entry={:#x} tree={:#x} SPSR={:#x}",
            entry,
            tree,
            spsr
        );

        Ok(Handoff {
            level: self.level,
            state: Configured { entry, tree },
        })
    }
}

impl<L: LevelControl> Handoff<L, Configured> {
    #[must_use]
    pub fn entry(&self) -> PhysAddr {
        self.state.entry
    }

    /// Enter `Transferred`: the next instruction belongs to the kernel.
    pub fn transfer(mut self) -> ! {
        log::info!(
            "Entering kernel at {:#x} with device tree {:#x}",
            self.state.entry,
            self.state.tree
        );
        keel_pal::console::flush();
        // SAFETY: `configure` programmed the return state
        unsafe { self.level.eret(self.state.tree.as_u64()) }
    }
}

// -- Hand-off record shared with secondary cores

/// What a secondary needs to follow the primary into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    pub entry: PhysAddr,
    pub tree: PhysAddr,
}

/// Write-once slot for the [`BootRecord`].
pub struct RecordSlot {
    record: Once<BootRecord>,
}

impl RecordSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self { record: Once::new() }
    }

    /// Publish the record. Only the first call succeeds.
    pub fn publish(&self, record: BootRecord) -> Result<&BootRecord, BootError> {
        let mut fresh = false;
        let stored = self.record.call_once(|| {
            fresh = true;
            record
        });
        if fresh { Ok(stored) } else { Err(BootError::AlreadyPrepared) }
    }

    /// The published record, if any.
    pub fn get(&self) -> Option<&BootRecord> {
        self.record.get()
    }
}

impl Default for RecordSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// The record published by the primary before any secondary is powered on.
pub static BOOT_RECORD: RecordSlot = RecordSlot::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Vectors(u64),
        Prepare,
        Return(u64, u64),
    }

    struct MockLevel {
        el: u8,
        calls: Vec<Call>,
    }

    impl MockLevel {
        fn at(el: u8) -> Self {
            Self { el, calls: Vec::new() }
        }
    }

    impl LevelControl for MockLevel {
        fn current_level(&self) -> u8 {
            self.el
        }

        unsafe fn install_vectors(&mut self, base: u64) {
            self.calls.push(Call::Vectors(base));
        }

        unsafe fn prepare_lower_level(&mut self) {
            self.calls.push(Call::Prepare);
        }

        unsafe fn set_return_state(&mut self, entry: u64, spsr: u64) {
            self.calls.push(Call::Return(entry, spsr));
        }

        unsafe fn eret(&mut self, arg0: u64) -> ! {
            panic!("eret x0={:#x} after {:?}", arg0, self.calls)
        }
    }

    #[test]
    fn test_wrong_level_is_refused() {
        let result = Handoff::begin(MockLevel::at(1), 2);
        assert!(matches!(
            result,
            Err(BootError::WrongPrivilegeLevel {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn test_configure_programs_registers_in_order() {
        let handoff = Handoff::begin(MockLevel::at(2), 2).unwrap();
        let configured = unsafe {
            handoff.configure(0x4000_0800, PhysAddr(0x4040_0000), PhysAddr(0x4820_0000), 1)
        }
        .unwrap();
        assert_eq!(configured.entry(), PhysAddr(0x4040_0000));
        assert_eq!(
            configured.level.calls,
            [
                Call::Vectors(0x4000_0800),
                Call::Prepare,
                Call::Return(0x4040_0000, 0x3c5),
            ]
        );
    }

    #[test]
    fn test_target_level_must_be_lower() {
        let handoff = Handoff::begin(MockLevel::at(2), 2).unwrap();
        let result = unsafe { handoff.configure(0, PhysAddr(0x1000), PhysAddr(0x2000), 2) };
        assert!(matches!(result, Err(BootError::InvalidTargetLevel(2))));
    }

    #[test]
    #[should_panic(expected = "eret x0=0x48200000")]
    fn test_transfer_passes_tree_in_x0() {
        let handoff = Handoff::begin(MockLevel::at(2), 2).unwrap();
        let configured = unsafe {
            handoff.configure(0x4000_0800, PhysAddr(0x4040_0000), PhysAddr(0x4820_0000), 1)
        }
        .unwrap();
        configured.transfer();
    }

    #[test]
    fn test_record_publishes_once() {
        let slot = RecordSlot::new();
        assert_eq!(slot.get(), None);

        let record = BootRecord {
            entry: PhysAddr(0x4040_0000),
            tree: PhysAddr(0x4820_0000),
        };
        assert_eq!(slot.publish(record), Ok(&record));
        let other = BootRecord {
            entry: PhysAddr(0),
            tree: PhysAddr(0),
        };
        assert_eq!(slot.publish(other), Err(BootError::AlreadyPrepared));
        assert_eq!(slot.get(), Some(&record));
    }
}

//! PL011 UART
//!
//! Transmit side only. The previous boot stage has already programmed baud
//! rate and line control; the stub just feeds the TX FIFO.

use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields, register_structs,
    registers::{ReadOnly, ReadWrite},
};

register_bitfields! {
    u32,

    /// Flag Register
    FR [
        /// Transmit FIFO empty
        TXFE OFFSET(7) NUMBITS(1) [],
        /// Transmit FIFO full
        TXFF OFFSET(5) NUMBITS(1) [],
        /// Receive FIFO empty
        RXFE OFFSET(4) NUMBITS(1) [],
        /// UART busy transmitting
        BUSY OFFSET(3) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => DR: ReadWrite<u32>),
        (0x04 => _reserved1),
        (0x18 => FR: ReadOnly<u32, FR::Register>),
        (0x1c => @END),
    }
}

/// A PL011 at a fixed physical address.
#[derive(Debug, Clone, Copy)]
pub struct Pl011 {
    base: usize,
}

impl Pl011 {
    /// # Safety
    /// `base` must be the identity-mapped address of a PL011 register block.
    #[must_use]
    pub const unsafe fn new(base: u64) -> Self {
        Self {
            base: base as usize,
        }
    }

    /// Register block base address.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base as u64
    }

    fn registers(&self) -> &RegisterBlock {
        // SAFETY: `new` requires a valid register block at `base`.
        unsafe { &*(self.base as *const RegisterBlock) }
    }

    /// Write one byte, waiting for room in the TX FIFO.
    pub fn write_byte(&self, byte: u8) {
        let regs = self.registers();
        while regs.FR.is_set(FR::TXFF) {
            core::hint::spin_loop();
        }
        regs.DR.set(u32::from(byte));
    }

    /// Wait until the last character has left the shift register.
    pub fn flush(&self) {
        while self.registers().FR.is_set(FR::BUSY) {
            core::hint::spin_loop();
        }
    }
}

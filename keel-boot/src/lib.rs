//! keel Boot Stub
//!
//! Runs at EL2 on the boot core and:
//! 1. Selects the payload configuration matching this board
//! 2. Loads kernel, device tree and ramdisk to their load addresses
//! 3. Reserves the stub's own memory in the outgoing device tree
//! 4. Moves the kernel to the first usable RAM address
//! 5. Releases secondary cores through PSCI
//! 6. Drops to EL1 at the kernel entry with x0 = device tree
//!
//! The library holds everything that can be tested on the host; the `keel`
//! binary adds the entry assembly and the panic handler.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod boot;
pub mod config;
pub mod error;
pub mod handoff;
pub mod logger;
pub mod pipeline;
pub mod smp;
pub mod stages;

pub use error::{BootError, fatal};

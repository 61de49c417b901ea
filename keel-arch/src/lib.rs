//! # keel-arch
//!
//! AArch64 support for the keel boot stub, which runs at EL2 with the MMU off.
//!
//! - [`cpu`]: core identity, exception level, barriers, halt, EL2 setup for
//!   dropping to EL1
//! - [`registers`]: EL2 system register access and diagnostic dumps
//! - [`cache`]: data cache clean and instruction cache invalidate
//! - [`exceptions`]: the EL2 vector table; every exception is fatal
//!
//! # Safety
//!
//! Register writes that are only legal at EL2 are `unsafe fn`s. Every unsafe
//! block carries a `// SAFETY:` comment.
//!
//! # Host builds
//!
//! Raw `asm!` is compiled only for `target_arch = "aarch64"`, so crates that
//! depend on this one still build and test on a development host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod cpu;
pub mod exceptions;
pub mod registers;

pub use cpu::{current_el, halt};

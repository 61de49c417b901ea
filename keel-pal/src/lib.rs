//! Platform Abstraction Layer
//!
//! The pieces of the platform the stub talks to directly:
//! - PL011 console for the boot log
//! - PSCI, the firmware interface that powers cores on and off
//! - device-tree queries (CPU list, PSCI conduit) through the `fdt` crate
//!
//! Hardware access sits behind small seams ([`psci::PsciConduit`]) so the
//! logic above it runs under the host test harness.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod dtb;
pub mod pl011;
pub mod psci;

pub use dtb::DtbError;
pub use psci::{AffinityState, Psci, PsciConduit, PsciError, PsciMethod, PsciVersion};

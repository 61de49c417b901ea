//! # keel-fit
//!
//! Image resolution core of the keel boot stub.
//!
//! The payload handed over by the previous boot stage is a flattened tree with
//! a `/configurations` subtree and an `/images` subtree. This crate turns it
//! into bytes at their final physical location:
//!
//! - [`tree`]: bounds-checked, read-only accessor over a flattened tree
//! - [`config`]: selects the configuration matching the running platform
//! - [`component`]: locates component nodes and computes their extents
//! - [`loader`]: copies component bytes into place, overlap-safe
//! - [`memmap`]: rewrites the outgoing tree's memory description
//!
//! Everything here is pure with respect to hardware: memory is reached only
//! through byte slices and [`PhysWindow`], so the whole pipeline runs under
//! the host test harness.
//!
//! # Pipeline
//!
//! ```text
//! select_best_configuration -> resolve_component -> load -> exclude_region
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

pub mod component;
pub mod config;
pub mod error;
pub mod loader;
pub mod memmap;
pub mod tree;

#[cfg(any(test, feature = "builder"))]
pub mod builder;

pub use component::{AddressExpansion, Component, Role, payload_span, resolve_component};
pub use config::{Configuration, select_best_configuration};
pub use error::{Error, Result};
pub use loader::{Overlap, PhysWindow, load, relocate_kernel};
pub use memmap::{PatchedTree, exclude_region};
pub use tree::{Node, Property, Tree};

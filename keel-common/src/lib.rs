//! # keel-common
//!
//! Shared types for the keel boot stub.
//!
//! - [`PhysAddr`](addr::PhysAddr): physical address newtype
//! - [`Extent`](extent::Extent): a `(location, size)` pair describing where
//!   bytes currently sit or where they must end up
//!
//! # no_std
//!
//! This crate is `#![no_std]` and has zero dependencies so every other keel
//! crate can build on it, on the target and on the development host alike.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod extent;

pub use addr::PhysAddr;
pub use extent::Extent;

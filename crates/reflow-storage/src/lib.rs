//! Storage layer for Reflow
//!
//! The write pipeline talks to durable storage through the [`StorageDriver`]
//! trait - a pluggable blob interface. This crate defines the contract and
//! ships two drivers:
//!
//! - [`MemoryDriver`]: process-local map, shareable between instances so
//!   multi-instance sync is testable without a browser or a second process.
//! - [`FileDriver`]: one JSON document per key under a root directory.
//!
//! The [`testing`] module provides a recording decorator used by the engine's
//! scenario tests to count and inspect driver calls.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod file;
pub mod memory;
pub mod testing;

pub use driver::{InstanceSyncCallback, StorageDriver};
pub use file::FileDriver;
pub use memory::{MemoryBacking, MemoryDriver};

//! Item store abstraction and implementations for LinePlan.
//!
//! This crate provides the trait-based interface the planner reads queued
//! items from and writes predictions back into, with an in-memory store and
//! a JSON-file store.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;

pub use trait_::{Storage, StorageError, Result};
pub use memory::MemoryStorage;
pub use json_storage::JsonStorage;

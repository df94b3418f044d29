//! testreg-store: Registry store backends.
//!
//! Implements the `RegistryStore` trait for an in-process map and for a JSON
//! state file on disk.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::{MemoryStore, StoreSnapshot};

//! Infrastructure layer - Storage adapters
//!
//! - `fs`: snapshot/log files on local disk
//! - `memory`: in-process store for tests and dry runs

pub mod fs;
pub mod memory;

pub use fs::FsRegistryStore;
pub use memory::MemoryRegistryStore;

//! aimood-storage - Registry snapshot persistence
//!
//! Every stage boundary of the harvest pipeline keeps a registry of all rows
//! it has seen. This crate owns where those registries land.
//!
//! ## Core Principles
//!
//! 1. **Full overwrite**: a snapshot always carries the whole registry
//! 2. **Append-only log**: one `<timestamp>: Saved <n> items from registry` line per save
//! 3. **Schema-agnostic**: rows are whatever `serde::Serialize` produces
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aimood_storage::{FsRegistryStore, RegistrySnapshot, RegistryStore};
//!
//! let store = FsRegistryStore::new("data");
//! let snapshot = RegistrySnapshot::encode("metadata", &rows)?;
//! store.persist(&snapshot).await?;   // data/snapshot/metadata.json + data/log/metadata.txt
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{RegistrySnapshot, RegistryStore, SaveLogEntry};
pub use infrastructure::{FsRegistryStore, MemoryRegistryStore};

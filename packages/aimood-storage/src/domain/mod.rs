//! Domain layer for registry persistence
//!
//! # Domain Models
//!
//! - `RegistrySnapshot`: full materialization of one registry at a point in time
//! - `SaveLogEntry`: one line of the append-only save log
//!
//! # Port Trait
//!
//! - `RegistryStore`: where snapshots and log lines end up
//!
//! A snapshot is never incremental: every save carries the whole registry and
//! replaces whatever was stored under the same namespace before.
//!
//! # Examples
//!
//! ```rust,ignore
//! use aimood_storage::{RegistrySnapshot, RegistryStore};
//!
//! async fn example(store: impl RegistryStore, rows: Vec<serde_json::Value>) -> Result<()> {
//!     let snapshot = RegistrySnapshot::encode("metadata", &rows)?;
//!     store.persist(&snapshot).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use crate::{Result, StorageError};

/// Timestamp layout used in the save log
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Encoded registry, ready to be written
///
/// `body` is the registry rendered as a pretty-printed JSON array (two-space
/// indent). Encoding the same records twice yields the same bytes.
///
/// # Examples
///
/// ```rust
/// use aimood_storage::domain::RegistrySnapshot;
/// use serde_json::json;
///
/// let snapshot = RegistrySnapshot::encode("labels", &[json!({"id": 1})]).unwrap();
/// assert_eq!(snapshot.count, 1);
/// assert_eq!(snapshot.namespace, "labels");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub namespace: String,
    pub count: usize,
    pub taken_at: DateTime<Local>,
    pub body: Vec<u8>,
}

impl RegistrySnapshot {
    pub fn encode<T: Serialize>(namespace: impl Into<String>, records: &[T]) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;

        Ok(Self {
            count: records.len(),
            body: serde_json::to_vec_pretty(records)?,
            taken_at: Local::now(),
            namespace,
        })
    }

    /// Log line describing this save
    pub fn log_entry(&self) -> SaveLogEntry {
        SaveLogEntry {
            timestamp: self.taken_at,
            count: self.count,
        }
    }
}

/// One line of the save log: `<timestamp>: Saved <count> items from registry`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveLogEntry {
    pub timestamp: DateTime<Local>,
    pub count: usize,
}

impl fmt::Display for SaveLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Saved {} items from registry",
            self.timestamp.format(LOG_TIMESTAMP_FORMAT),
            self.count
        )
    }
}

/// Namespaces become file stems, so they must be a single path component.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let bad = namespace.is_empty()
        || namespace == "."
        || namespace == ".."
        || namespace.contains(['/', '\\', '\0']);

    if bad {
        Err(StorageError::invalid_namespace(namespace))
    } else {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Registry persistence port
///
/// Implementations must make `save_snapshot` a full overwrite and
/// `append_log` append-only.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Replace the stored snapshot for `snapshot.namespace`
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()>;

    /// Append one line to the namespace's save log
    async fn append_log(&self, namespace: &str, entry: &SaveLogEntry) -> Result<()>;

    /// Latest snapshot body for a namespace
    ///
    /// # Errors
    /// - `NotFound` if nothing was saved under `namespace`
    async fn load_snapshot(&self, namespace: &str) -> Result<Vec<u8>>;

    /// All log lines for a namespace, oldest first (empty if none)
    async fn read_log(&self, namespace: &str) -> Result<Vec<String>>;

    /// Save the snapshot, then log it. The log line is only written when the
    /// snapshot itself was stored.
    async fn persist(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        self.save_snapshot(snapshot).await?;
        self.append_log(&snapshot.namespace, &snapshot.log_entry())
            .await
    }
}

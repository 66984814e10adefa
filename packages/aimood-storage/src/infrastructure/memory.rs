//! In-memory adapter for `RegistryStore`

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::{validate_namespace, RegistrySnapshot, RegistryStore, SaveLogEntry};
use crate::{Result, StorageError};

#[derive(Default)]
struct MemoryState {
    snapshots: HashMap<String, Vec<u8>>,
    logs: HashMap<String, Vec<String>>,
    saves: HashMap<String, usize>,
}

/// Keeps the latest snapshot and the full log per namespace.
///
/// `set_failing(true)` makes every write return an I/O error until reset,
/// which lets callers exercise their storage-failure handling.
#[derive(Default)]
pub struct MemoryRegistryStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful `save_snapshot` calls for a namespace
    pub fn save_count(&self, namespace: &str) -> usize {
        self.state.lock().saves.get(namespace).copied().unwrap_or(0)
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().snapshots.keys().cloned().collect();
        names.sort();
        names
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::io("simulated write failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        validate_namespace(&snapshot.namespace)?;
        self.check_writable()?;

        let mut state = self.state.lock();
        state
            .snapshots
            .insert(snapshot.namespace.clone(), snapshot.body.clone());
        *state.saves.entry(snapshot.namespace.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn append_log(&self, namespace: &str, entry: &SaveLogEntry) -> Result<()> {
        validate_namespace(namespace)?;
        self.check_writable()?;

        self.state
            .lock()
            .logs
            .entry(namespace.to_string())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }

    async fn load_snapshot(&self, namespace: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .snapshots
            .get(namespace)
            .cloned()
            .ok_or_else(|| StorageError::not_found(namespace))
    }

    async fn read_log(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .logs
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

//! Filesystem adapter for `RegistryStore`
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/snapshot/<namespace>.json   full registry, overwritten on every save
//! <root>/log/<namespace>.txt         one line appended per save
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::domain::{validate_namespace, RegistrySnapshot, RegistryStore, SaveLogEntry};
use crate::{Result, StorageError};

pub const SNAPSHOT_DIR: &str = "snapshot";
pub const LOG_DIR: &str = "log";

#[derive(Debug, Clone)]
pub struct FsRegistryStore {
    root: PathBuf,
}

impl FsRegistryStore {
    /// Directories are created on first write, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self, namespace: &str) -> PathBuf {
        self.root
            .join(SNAPSHOT_DIR)
            .join(format!("{}.json", namespace))
    }

    pub fn log_path(&self, namespace: &str) -> PathBuf {
        self.root.join(LOG_DIR).join(format!("{}.txt", namespace))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl RegistryStore for FsRegistryStore {
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        validate_namespace(&snapshot.namespace)?;
        let path = self.snapshot_path(&snapshot.namespace);
        ensure_parent(&path).await?;

        // Readers never observe a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &snapshot.body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn append_log(&self, namespace: &str, entry: &SaveLogEntry) -> Result<()> {
        validate_namespace(namespace)?;
        let path = self.log_path(namespace);
        ensure_parent(&path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{}\n", entry).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_snapshot(&self, namespace: &str) -> Result<Vec<u8>> {
        validate_namespace(namespace)?;
        match fs::read(self.snapshot_path(namespace)).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(namespace))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_log(&self, namespace: &str) -> Result<Vec<String>> {
        validate_namespace(namespace)?;
        match fs::read_to_string(self.log_path(namespace)).await {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persist_writes_snapshot_and_log() {
        let dir = TempDir::new().unwrap();
        let store = FsRegistryStore::new(dir.path());

        let snapshot = RegistrySnapshot::encode("metadata", &[json!({"_id": "a"})]).unwrap();
        store.persist(&snapshot).await.unwrap();

        let on_disk = std::fs::read(dir.path().join("snapshot/metadata.json")).unwrap();
        assert_eq!(on_disk, snapshot.body);

        let log = store.read_log("metadata").await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].ends_with(": Saved 1 items from registry"));
    }

    #[tokio::test]
    async fn test_snapshot_is_overwritten_and_log_appended() {
        let dir = TempDir::new().unwrap();
        let store = FsRegistryStore::new(dir.path());

        let first = RegistrySnapshot::encode("content", &[json!({"n": 1})]).unwrap();
        let second =
            RegistrySnapshot::encode("content", &[json!({"n": 1}), json!({"n": 2})]).unwrap();
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();

        assert_eq!(store.load_snapshot("content").await.unwrap(), second.body);
        assert!(!dir.path().join("snapshot/content.json.tmp").exists());

        let log = store.read_log("content").await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[1].ends_with("Saved 2 items from registry"));
    }

    #[tokio::test]
    async fn test_load_missing_namespace() {
        let dir = TempDir::new().unwrap();
        let store = FsRegistryStore::new(dir.path());

        let err = store.load_snapshot("labels").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(store.read_log("labels").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_root_reports_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = FsRegistryStore::new(&blocker);
        let records: Vec<serde_json::Value> = vec![];
        let snapshot = RegistrySnapshot::encode("metadata", &records).unwrap();

        let err = store.persist(&snapshot).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::IO);
    }
}

//! SnapshotWriter: periodic persistence of one queue's registry
//!
//! The writer saves the full registry every `interval`, and once more after
//! the queue reports end of stream (or the run is cancelled). That final save
//! happens after `done` flipped, so every item accepted before the end marker
//! is on disk at least once. Storage failures are logged and counted; the
//! writer keeps its schedule and never stops the pipeline.

use crate::queue::RecordQueue;
use aimood_storage::{RegistrySnapshot, RegistryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub namespace: String,
    pub saves: usize,
    pub failures: usize,
    /// Registry length at the last successful save
    pub last_count: usize,
}

pub struct SnapshotWriter {
    queue: Arc<RecordQueue>,
    store: Arc<dyn RegistryStore>,
    namespace: String,
    interval: Duration,
}

impl SnapshotWriter {
    /// Namespace defaults to the queue name
    pub fn new(queue: Arc<RecordQueue>, store: Arc<dyn RegistryStore>) -> Self {
        Self {
            namespace: queue.name().to_string(),
            queue,
            store,
            interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Persist the current registry and log the save. Returns the number of
    /// items written.
    pub async fn save(&self) -> aimood_storage::Result<usize> {
        let registry = self.queue.registry();
        let snapshot = RegistrySnapshot::encode(&self.namespace, &registry)?;
        self.store.persist(&snapshot).await?;
        Ok(snapshot.count)
    }

    async fn save_reported(&self, summary: &mut SnapshotSummary) {
        match self.save().await {
            Ok(count) => {
                summary.saves += 1;
                summary.last_count = count;
                debug!(namespace = %self.namespace, count, "Saved registry snapshot");
            }
            Err(e) => {
                summary.failures += 1;
                error!(namespace = %self.namespace, error = %e, "Failed to save registry snapshot");
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> SnapshotSummary {
        let mut summary = SnapshotSummary {
            namespace: self.namespace.clone(),
            ..Default::default()
        };
        let mut done = self.queue.subscribe_done();

        while !self.queue.is_done() && !cancel.is_cancelled() {
            self.save_reported(&mut summary).await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = done.changed() => {}
                _ = cancel.cancelled() => {}
            }
        }

        self.save_reported(&mut summary).await;

        info!(
            namespace = %self.namespace,
            saves = summary.saves,
            failures = summary.failures,
            items = summary.last_count,
            "Snapshot writer finished"
        );
        summary
    }
}

//! PipelineStage: bounded-concurrency forwarding between two queues
//!
//! A stage drains its input queue in batches of at most
//! `max_concurrent_calls` items, runs one transform call per item
//! concurrently, forwards every output to the output queue, and waits for the
//! whole batch before pulling the next one. When the input reports end of
//! stream (or the run is cancelled) the stage finishes the batch in hand and
//! closes its output queue exactly once.

use crate::error::{PipelineError, Result, TransformError};
use crate::item::{Entry, Item};
use crate::queue::RecordQueue;
use crate::transform::Transform;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stage metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub items_in: usize,
    pub items_out: usize,
    pub batches: usize,
    pub transport_failures: usize,
    pub unexpected_failures: usize,
    pub panics: usize,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl StageReport {
    /// Items dropped for any reason
    pub fn failures(&self) -> usize {
        self.transport_failures + self.unexpected_failures + self.panics
    }

    fn record_failure(&mut self, error: &TransformError) {
        match error {
            TransformError::Transport(_) => self.transport_failures += 1,
            TransformError::Unexpected(_) => self.unexpected_failures += 1,
        }
    }
}

/// Items pulled for one round of calls
#[derive(Debug, Default)]
struct Batch {
    items: Vec<Item>,
    exhausted: bool,
    cancelled: bool,
}

pub struct PipelineStage {
    name: String,
    queue_in: Arc<RecordQueue>,
    queue_out: Arc<RecordQueue>,
    transform: Arc<dyn Transform>,
    max_concurrent_calls: usize,
}

impl PipelineStage {
    pub fn new(
        name: impl Into<String>,
        queue_in: Arc<RecordQueue>,
        queue_out: Arc<RecordQueue>,
        transform: Arc<dyn Transform>,
        max_concurrent_calls: usize,
    ) -> Result<Self> {
        let name = name.into();
        if max_concurrent_calls == 0 {
            return Err(PipelineError::ContractViolation(format!(
                "stage '{}': max_concurrent_calls must be at least 1",
                name
            )));
        }

        Ok(Self {
            name,
            queue_in,
            queue_out,
            transform,
            max_concurrent_calls,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    /// Drive the stage until its input is exhausted or `cancel` fires.
    ///
    /// # Errors
    /// Only contract violations (queue misuse); transform failures are
    /// logged and counted in the report.
    pub async fn run(self, cancel: CancellationToken) -> Result<StageReport> {
        let start = Instant::now();
        let mut report = StageReport {
            stage: self.name.clone(),
            ..Default::default()
        };

        info!(
            stage = %self.name,
            transform = self.transform.name(),
            max_concurrent_calls = self.max_concurrent_calls,
            "Stage started"
        );

        loop {
            let batch = self.pull_batch(&cancel).await?;
            report.items_in += batch.items.len();

            if !batch.items.is_empty() {
                report.batches += 1;
                debug!(
                    stage = %self.name,
                    batch = report.batches,
                    size = batch.items.len(),
                    "Dispatching batch"
                );
                self.process_batch(batch.items, &mut report).await?;
            }

            if batch.cancelled {
                report.cancelled = true;
                break;
            }
            if batch.exhausted {
                break;
            }
        }

        self.queue_out.close()?;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            stage = %self.name,
            items_in = report.items_in,
            items_out = report.items_out,
            failures = report.failures(),
            batches = report.batches,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Stage finished"
        );
        Ok(report)
    }

    /// Block for each of up to `max_concurrent_calls` slots; stop early on
    /// end of stream or cancellation.
    async fn pull_batch(&self, cancel: &CancellationToken) -> Result<Batch> {
        let mut batch = Batch::default();

        while batch.items.len() < self.max_concurrent_calls {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    batch.cancelled = true;
                    break;
                }
                entry = self.queue_in.get() => entry,
            };
            self.queue_in.task_done()?;

            match entry {
                Entry::EndOfStream => {
                    batch.exhausted = true;
                    break;
                }
                Entry::Item(item) => batch.items.push(item),
            }
        }

        Ok(batch)
    }

    /// Run one call per item and forward outputs as calls complete.
    /// Returns once every call of the batch has finished.
    async fn process_batch(&self, items: Vec<Item>, report: &mut StageReport) -> Result<()> {
        let mut calls = JoinSet::new();
        let mut outstanding: Vec<Option<Item>> = Vec::with_capacity(items.len());

        for (idx, item) in items.into_iter().enumerate() {
            outstanding.push(Some(item.clone()));
            let transform = Arc::clone(&self.transform);
            calls.spawn(async move { (idx, transform.call(item).await) });
        }

        while let Some(joined) = calls.join_next().await {
            // A panicked call has no index; it is reported below from `outstanding`.
            let Ok((idx, result)) = joined else {
                continue;
            };
            let item = outstanding[idx].take();

            match result {
                Ok(outputs) => {
                    for output in outputs {
                        self.queue_out.push(output)?;
                        report.items_out += 1;
                    }
                }
                Err(error) => {
                    report.record_failure(&error);
                    warn!(
                        stage = %self.name,
                        transform = self.transform.name(),
                        category = %error.category(),
                        item = %item.unwrap_or_default(),
                        error = %error,
                        "Transform call failed, item dropped"
                    );
                }
            }
        }

        for item in outstanding.into_iter().flatten() {
            report.panics += 1;
            warn!(
                stage = %self.name,
                transform = self.transform.name(),
                item = %item,
                "Transform call panicked, item dropped"
            );
        }

        Ok(())
    }
}

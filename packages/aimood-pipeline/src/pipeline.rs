use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::item::Item;
use crate::queue::RecordQueue;
use crate::rate_limit::RateLimited;
use crate::snapshot::{SnapshotSummary, SnapshotWriter, DEFAULT_SNAPSHOT_INTERVAL};
use crate::stage::{PipelineStage, StageReport};
use crate::transform::Transform;
use aimood_storage::{FsRegistryStore, RegistryStore};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Name of queue 0, the one seeded with the initial request items
pub const SEED_QUEUE: &str = "seed";

/// One stage as declared by the caller
#[derive(Clone)]
pub struct StageDefinition {
    pub name: String,
    pub transform: Arc<dyn Transform>,
    pub max_concurrent_calls: usize,
}

/// Registry of one stage boundary after the run
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRegistry {
    pub name: String,
    pub items: Vec<Item>,
}

/// Pipeline result: every registry (seed first), plus per-stage metrics
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub registries: Vec<NamedRegistry>,
    pub reports: Vec<StageReport>,
    pub snapshots: Vec<SnapshotSummary>,
    pub duration_ms: u64,
}

impl PipelineOutput {
    pub fn registry(&self, name: &str) -> Option<&[Item]> {
        self.registries
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.items.as_slice())
    }

    /// Output registry of the last stage
    pub fn final_registry(&self) -> &[Item] {
        self.registries
            .last()
            .map(|r| r.items.as_slice())
            .unwrap_or_default()
    }

    pub fn cancelled(&self) -> bool {
        self.reports.iter().any(|r| r.cancelled)
    }
}

pub struct PipelineBuilder {
    store: Arc<dyn RegistryStore>,
    stages: Vec<StageDefinition>,
    snapshot_interval: Duration,
}

impl PipelineBuilder {
    pub fn stage(
        mut self,
        name: impl Into<String>,
        transform: Arc<dyn Transform>,
        max_concurrent_calls: usize,
    ) -> Self {
        self.stages.push(StageDefinition {
            name: name.into(),
            transform,
            max_concurrent_calls,
        });
        self
    }

    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// # Errors
    /// - `Config`: no stages, duplicate or reserved names, zero interval
    /// - `ContractViolation`: a stage with `max_concurrent_calls == 0`
    pub fn build(self) -> Result<Pipeline> {
        if self.stages.is_empty() {
            return Err(PipelineError::config("pipeline needs at least one stage"));
        }
        if self.snapshot_interval.is_zero() {
            return Err(PipelineError::config("snapshot interval must be positive"));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name == SEED_QUEUE || !names.insert(stage.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "stage name '{}' is reserved or already used",
                    stage.name
                )));
            }
            if stage.max_concurrent_calls == 0 {
                return Err(PipelineError::ContractViolation(format!(
                    "stage '{}': max_concurrent_calls must be at least 1",
                    stage.name
                )));
            }
        }

        Ok(Pipeline {
            store: self.store,
            stages: self.stages,
            snapshot_interval: self.snapshot_interval,
        })
    }
}

/// Chain of stages: queue k is stage k's output and stage k+1's input.
pub struct Pipeline {
    store: Arc<dyn RegistryStore>,
    stages: Vec<StageDefinition>,
    snapshot_interval: Duration,
}

impl Pipeline {
    pub fn builder(store: Arc<dyn RegistryStore>) -> PipelineBuilder {
        PipelineBuilder {
            store,
            stages: Vec::new(),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    /// Snapshots go to `config.snapshot_root` on the local filesystem
    pub fn from_config(config: &PipelineConfig, transforms: Vec<Arc<dyn Transform>>) -> Result<Self> {
        let store = Arc::new(FsRegistryStore::new(&config.snapshot_root));
        Self::from_config_with_store(config, store, transforms)
    }

    /// Pairs `transforms[k]` with `config.stages[k]`, wrapping it in the
    /// stage's rate limiter when one is configured.
    pub fn from_config_with_store(
        config: &PipelineConfig,
        store: Arc<dyn RegistryStore>,
        transforms: Vec<Arc<dyn Transform>>,
    ) -> Result<Self> {
        config.validate()?;
        if transforms.len() != config.stages.len() {
            return Err(PipelineError::Config(format!(
                "{} stages configured but {} transforms supplied",
                config.stages.len(),
                transforms.len()
            )));
        }

        let mut builder = Self::builder(store).snapshot_interval(config.snapshot_interval());
        for (settings, transform) in config.stages.iter().zip(transforms) {
            let transform: Arc<dyn Transform> = match &settings.rate_limit {
                Some(limit) => Arc::new(RateLimited::new(transform, limit.build()?)),
                None => transform,
            };
            builder = builder.stage(settings.name.clone(), transform, settings.max_concurrent_calls);
        }
        builder.build()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub async fn run(&self, seed: impl IntoIterator<Item = Item>) -> Result<PipelineOutput> {
        self.run_with_cancel(seed, CancellationToken::new()).await
    }

    /// Run every stage and snapshot writer to completion.
    ///
    /// Cancelling `cancel` stops new batches everywhere; writers still do
    /// their final save. A stage that fails (contract violation or panic)
    /// cancels the rest of the run and its error is returned.
    pub async fn run_with_cancel(
        &self,
        seed: impl IntoIterator<Item = Item>,
        cancel: CancellationToken,
    ) -> Result<PipelineOutput> {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let span = info_span!("pipeline", run_id = %run_id);
        // Child token: a failing stage must not cancel the caller's token.
        let run_cancel = cancel.child_token();

        let queues: Vec<Arc<RecordQueue>> = std::iter::once(SEED_QUEUE)
            .chain(self.stages.iter().map(|s| s.name.as_str()))
            .map(|name| Arc::new(RecordQueue::new(name)))
            .collect();

        let mut seeded = 0usize;
        for item in seed {
            queues[0].push(item)?;
            seeded += 1;
        }
        queues[0].close()?;

        span.in_scope(|| {
            info!(
                stages = ?self.stage_names(),
                seed_items = seeded,
                "Starting pipeline"
            )
        });

        let mut stage_tasks = Vec::with_capacity(self.stages.len());
        for (k, definition) in self.stages.iter().enumerate() {
            let stage = PipelineStage::new(
                definition.name.clone(),
                Arc::clone(&queues[k]),
                Arc::clone(&queues[k + 1]),
                Arc::clone(&definition.transform),
                definition.max_concurrent_calls,
            )?;
            let token = run_cancel.clone();

            stage_tasks.push(tokio::spawn(
                async move {
                    // Dropped without disarm (error or panic) → cancel the run
                    let guard = token.clone().drop_guard();
                    let result = stage.run(token).await;
                    if result.is_ok() {
                        guard.disarm();
                    }
                    result
                }
                .instrument(span.clone()),
            ));
        }

        let writer_tasks: Vec<_> = queues[1..]
            .iter()
            .map(|queue| {
                let writer = SnapshotWriter::new(Arc::clone(queue), Arc::clone(&self.store))
                    .with_interval(self.snapshot_interval);
                tokio::spawn(writer.run(run_cancel.clone()).instrument(span.clone()))
            })
            .collect();

        let stage_results = join_all(stage_tasks).await;
        let writer_results = join_all(writer_tasks).await;

        let mut first_error: Option<PipelineError> = None;
        let mut reports = Vec::with_capacity(stage_results.len());
        for (definition, joined) in self.stages.iter().zip(stage_results) {
            let failure = match joined {
                Ok(Ok(report)) => {
                    reports.push(report);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(join_err) => PipelineError::TaskFailed(format!(
                    "stage '{}': {}",
                    definition.name, join_err
                )),
            };
            span.in_scope(|| error!(stage = %definition.name, error = %failure, "Stage failed"));
            first_error.get_or_insert(failure);
        }

        let mut snapshots = Vec::with_capacity(writer_results.len());
        for joined in writer_results {
            match joined {
                Ok(summary) => snapshots.push(summary),
                Err(join_err) => {
                    let failure = PipelineError::TaskFailed(format!("snapshot writer: {}", join_err));
                    span.in_scope(|| error!(error = %failure, "Snapshot writer failed"));
                    first_error.get_or_insert(failure);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let registries: Vec<NamedRegistry> = queues
            .iter()
            .map(|queue| NamedRegistry {
                name: queue.name().to_string(),
                items: queue.registry(),
            })
            .collect();
        let duration_ms = start.elapsed().as_millis() as u64;

        span.in_scope(|| {
            info!(
                final_items = registries.last().map_or(0, |r| r.items.len()),
                cancelled = reports.iter().any(|r| r.cancelled),
                duration_ms,
                "Pipeline finished"
            )
        });

        Ok(PipelineOutput {
            run_id,
            registries,
            reports,
            snapshots,
            duration_ms,
        })
    }
}

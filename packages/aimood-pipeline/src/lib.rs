/*
 * AIMood Pipeline - Staged Record Harvesting
 *
 * Chains remote-call stages (article search, content fetch, labelling)
 * through registry-backed queues.
 *
 * Architecture:
 * - RecordQueue: FIFO + append-only registry + end-of-stream marker
 * - PipelineStage: batched calls under a per-stage concurrency cap
 * - SnapshotWriter: periodic JSON snapshots of every registry
 * - RateLimiter: per-window call budgets for remote APIs
 * - Pipeline: wiring, cancellation, YAML configuration
 */

// Public modules
pub mod config;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod snapshot;
pub mod stage;
pub mod telemetry;
pub mod transform;

// Re-exports
pub use config::{PipelineConfig, RateLimitSettings, StageSettings};
pub use error::{ErrorCategory, PipelineError, Result, TransformError};
pub use item::{Entry, Item};
pub use pipeline::{
    NamedRegistry, Pipeline, PipelineBuilder, PipelineOutput, StageDefinition, SEED_QUEUE,
};
pub use queue::RecordQueue;
pub use rate_limit::{RateLimited, RateLimiter};
pub use snapshot::{SnapshotSummary, SnapshotWriter, DEFAULT_SNAPSHOT_INTERVAL};
pub use stage::{PipelineStage, StageReport};
pub use telemetry::init_tracing;
pub use transform::{transform_fn, FnTransform, Transform, TransformResult};

pub use aimood_storage::{FsRegistryStore, MemoryRegistryStore, RegistryStore};

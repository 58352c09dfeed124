//! Durable render job queue.
//!
//! Jobs are persisted in SQLite so their status survives restarts. Failed
//! attempts are retried with exponential backoff, and terminal jobs are
//! pruned to a bounded history.

mod models;
mod queue;
mod queue_store;
mod retry_policy;
mod schema;

pub use models::{
    AiHybridSettings, AttemptOutcome, JobHandle, JobProgress, JobState, JobStatusView,
    QueueCounts, RenderJob, RenderJobData, RenderMode, RenderSettings, RenderStage,
    StaleRecovery,
};
pub use queue::RenderQueue;
pub use queue_store::{RenderQueueStore, SqliteRenderQueueStore};
pub use retry_policy::RetryPolicy;

//! Render queue facade used by the HTTP layer and the worker service.

use super::models::*;
use super::queue_store::RenderQueueStore;
use super::retry_policy::RetryPolicy;
use crate::config::RenderWorkerSettings;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Accepts render requests, hands them to workers and applies the retry
/// and retention policies on every terminal transition.
pub struct RenderQueue {
    store: Arc<dyn RenderQueueStore>,
    retry_policy: RetryPolicy,
    retain_completed: usize,
    retain_failed: usize,
}

impl RenderQueue {
    pub fn new(store: Arc<dyn RenderQueueStore>, settings: &RenderWorkerSettings) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::new(settings),
            retain_completed: settings.retain_completed,
            retain_failed: settings.retain_failed,
        }
    }

    pub fn enqueue(&self, data: RenderJobData) -> Result<JobHandle> {
        let job = RenderJob::new(data, self.retry_policy.max_attempts, now_ms());
        self.store.enqueue(&job)?;
        info!(
            job_id = %job.id,
            project_id = %job.data.project_id,
            mode = job.data.settings.mode.name(),
            "Enqueued render job"
        );
        Ok(JobHandle { id: job.id })
    }

    pub fn get_status(&self, id: &str) -> Result<Option<JobStatusView>> {
        Ok(self.store.get_job(id)?.map(|job| job.status_view()))
    }

    pub fn get_job(&self, id: &str) -> Result<Option<RenderJob>> {
        self.store.get_job(id)
    }

    pub fn list_for_project(&self, project_id: &str) -> Result<Vec<RenderJob>> {
        self.store.list_for_project(project_id)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        self.store.counts()
    }

    pub fn claim_next(&self) -> Result<Option<RenderJob>> {
        self.store.claim_next(now_ms())
    }

    pub fn report_progress(&self, id: &str, progress: &JobProgress) -> Result<()> {
        debug!(
            job_id = %id,
            stage = progress.stage.as_str(),
            progress = progress.progress,
            "Render progress"
        );
        self.store.update_progress(id, progress)
    }

    pub fn complete(&self, id: &str, output_path: &Path) -> Result<()> {
        self.store.mark_completed(id, output_path, now_ms())?;
        self.prune();
        Ok(())
    }

    /// Whether a failed attempt of `job` would be retried.
    pub fn will_retry(&self, job: &RenderJob, retryable: bool) -> bool {
        retryable && self.retry_policy.should_retry(job.attempts_made)
    }

    /// Records a failed attempt, either re-queueing the job with backoff or
    /// failing it for good.
    pub fn fail_attempt(
        &self,
        job: &RenderJob,
        reason: &str,
        retryable: bool,
    ) -> Result<AttemptOutcome> {
        if self.will_retry(job, retryable) {
            let run_after = self
                .retry_policy
                .next_run_after(job.attempts_made, now_ms());
            self.store.mark_retry(&job.id, run_after, reason)?;
            return Ok(AttemptOutcome::Retrying { run_after });
        }

        self.store.mark_failed(&job.id, reason, now_ms())?;
        self.prune();
        Ok(AttemptOutcome::Failed)
    }

    /// Run once at worker startup, before any job is claimed.
    pub fn recover_stale(&self) -> Result<StaleRecovery> {
        let recovery = self.store.requeue_stale_active(now_ms())?;
        if recovery.requeued > 0 || !recovery.failed_projects.is_empty() {
            info!(
                "Recovered interrupted render jobs: {} requeued, {} failed",
                recovery.requeued,
                recovery.failed_projects.len()
            );
            self.prune();
        }
        Ok(recovery)
    }

    fn prune(&self) {
        match self
            .store
            .prune_terminal(self.retain_completed, self.retain_failed)
        {
            Ok(0) => {}
            Ok(deleted) => debug!("Pruned {} old render jobs", deleted),
            Err(e) => warn!("Failed to prune render jobs: {}", e),
        }
    }
}

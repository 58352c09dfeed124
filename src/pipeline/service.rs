//! Competing-consumer worker loops draining the render queue.

use super::worker::{ProgressSink, RenderWorker};
use crate::config::RenderWorkerSettings;
use crate::render_queue::{AttemptOutcome, JobProgress, RenderJob, RenderQueue};
use crate::server::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerConfig {
    /// Jobs processed in parallel.
    pub concurrency: usize,
    /// Sleep between `claim_next` calls while the queue is empty.
    pub poll_interval: Duration,
}

impl From<&RenderWorkerSettings> for WorkerConfig {
    fn from(settings: &RenderWorkerSettings) -> Self {
        Self {
            concurrency: settings.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

/// Running worker loops. Dropping the handle leaves them running.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stops claiming new jobs and waits for in-flight ones to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Render worker task panicked: {}", e);
            }
        }
        info!("Render workers stopped");
    }
}

struct QueueProgressSink<'a> {
    queue: &'a RenderQueue,
    job_id: &'a str,
}

impl ProgressSink for QueueProgressSink<'_> {
    fn report(&self, progress: JobProgress) {
        if let Err(e) = self.queue.report_progress(self.job_id, &progress) {
            warn!(job_id = %self.job_id, "Failed to record progress: {}", e);
        }
    }
}

/// Recovers jobs left `active` by a previous process, then spawns
/// `config.concurrency` loops each running one job at a time.
pub fn start_worker(
    config: WorkerConfig,
    queue: Arc<RenderQueue>,
    worker: Arc<RenderWorker>,
) -> WorkerHandle {
    match queue.recover_stale() {
        Ok(recovery) => {
            for project_id in &recovery.failed_projects {
                worker.mark_project_failed(project_id);
            }
        }
        Err(e) => error!("Failed to recover interrupted render jobs: {}", e),
    }

    let shutdown = CancellationToken::new();
    let tasks = (0..config.concurrency.max(1))
        .map(|slot| {
            let queue = queue.clone();
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                worker_loop(slot, config.poll_interval, queue, worker, shutdown).await;
            })
        })
        .collect();

    info!("Started {} render worker(s)", config.concurrency.max(1));
    WorkerHandle { shutdown, tasks }
}

async fn worker_loop(
    slot: usize,
    poll_interval: Duration,
    queue: Arc<RenderQueue>,
    worker: Arc<RenderWorker>,
    shutdown: CancellationToken,
) {
    debug!("Render worker {} started", slot);
    while !shutdown.is_cancelled() {
        match queue.claim_next() {
            Ok(Some(job)) => run_job(&queue, &worker, job).await,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                error!("Failed to claim render job: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!("Render worker {} exiting", slot);
}

async fn run_job(queue: &RenderQueue, worker: &RenderWorker, job: RenderJob) {
    let mode = job.data.settings.mode.name();
    info!(
        job_id = %job.id,
        project_id = %job.data.project_id,
        attempt = job.attempts_made,
        mode,
        "Render job started"
    );
    metrics::set_render_jobs_in_flight_delta(1.0);
    let started = Instant::now();

    let sink = QueueProgressSink {
        queue,
        job_id: &job.id,
    };
    let result = worker.process(&job, &sink).await;
    metrics::set_render_jobs_in_flight_delta(-1.0);

    let outcome = match result {
        Ok(output_path) => match queue.complete(&job.id, &output_path) {
            Ok(()) => "completed",
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job completion: {}", e);
                "failed"
            }
        },
        Err(err) => {
            let retryable = err.is_retryable();
            // The project must read `failed` by the time the job does
            let final_attempt = !queue.will_retry(&job, retryable);
            if final_attempt {
                worker.mark_project_failed(&job.data.project_id);
            }
            match queue.fail_attempt(&job, &err.to_string(), retryable) {
                Ok(AttemptOutcome::Retrying { run_after }) => {
                    info!(job_id = %job.id, run_after, "Render job will be retried");
                    "retried"
                }
                Ok(AttemptOutcome::Failed) => {
                    error!(job_id = %job.id, "Render job failed: {}", err);
                    "failed"
                }
                Err(e) => {
                    error!(job_id = %job.id, "Failed to record job failure: {}", e);
                    if !final_attempt {
                        worker.mark_project_failed(&job.data.project_id);
                    }
                    "failed"
                }
            }
        }
    };
    metrics::record_render_job(outcome, mode, started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiSettings;
    use crate::pipeline::capture::{CaptureTarget, RenderSurface, SurfaceSession};
    use crate::pipeline::compositor::{EncodeRequest, VideoEncoder};
    use crate::projects::{
        BeginRender, NewProject, ProjectStatus, ProjectStore, SqliteProjectStore,
    };
    use crate::render_queue::{
        JobState, RenderJobData, RenderMode, RenderSettings, SqliteRenderQueueStore,
    };
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoSurface;

    #[async_trait]
    impl RenderSurface for NoSurface {
        async fn launch(&self, _target: &CaptureTarget) -> Result<Box<dyn SurfaceSession>> {
            bail!("no surface in tests")
        }
    }

    /// Fails the first `failures` calls, then writes the output file.
    struct FlakyEncoder {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VideoEncoder for FlakyEncoder {
        async fn encode(
            &self,
            request: &EncodeRequest,
            _on_progress: &(dyn Fn(u8) + Send + Sync),
        ) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                bail!("transient encoder failure");
            }
            tokio::fs::write(&request.output_path, b"mp4").await?;
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        queue: Arc<RenderQueue>,
        worker: Arc<RenderWorker>,
        projects: Arc<SqliteProjectStore>,
        project_id: String,
    }

    impl Fixture {
        fn project_status(&self) -> ProjectStatus {
            self.projects.get(&self.project_id).unwrap().unwrap().status
        }
    }

    fn setup(failures: usize, max_attempts: u32) -> Fixture {
        setup_with_backoff(failures, max_attempts, 0)
    }

    fn setup_with_backoff(failures: usize, max_attempts: u32, backoff_secs: u64) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = RenderWorkerSettings {
            max_attempts,
            initial_backoff_secs: backoff_secs,
            poll_interval_ms: 10,
            ..Default::default()
        };
        let queue = Arc::new(RenderQueue::new(
            Arc::new(SqliteRenderQueueStore::in_memory().unwrap()),
            &settings,
        ));
        let projects = Arc::new(SqliteProjectStore::in_memory().unwrap());
        let project = projects
            .create(NewProject {
                user_id: "u1".to_string(),
                name: "song".to_string(),
                audio_path: PathBuf::from("/audio/song.mp3"),
                status: ProjectStatus::Ready,
            })
            .unwrap();
        let worker = Arc::new(RenderWorker::new(
            projects.clone(),
            Arc::new(NoSurface),
            Arc::new(FlakyEncoder {
                failures,
                calls: AtomicUsize::new(0),
            }),
            None,
            AiSettings::default(),
            1.0,
        ));
        Fixture {
            dir,
            queue,
            worker,
            projects,
            project_id: project.id,
        }
    }

    fn job_data(dir: &Path, project_id: &str) -> RenderJobData {
        RenderJobData {
            project_id: project_id.to_string(),
            user_id: "u1".to_string(),
            audio_path: PathBuf::from("/audio/song.mp3"),
            output_path: dir.join(project_id).join("video.mp4"),
            settings: RenderSettings {
                fps: 10,
                width: 64,
                height: 48,
                mode: RenderMode::Procedural { duration: Some(1.0) },
            },
        }
    }

    async fn wait_for_terminal(queue: &RenderQueue, id: &str) -> JobState {
        for _ in 0..500 {
            let status = queue.get_status(id).unwrap().unwrap();
            if status.state.is_terminal() {
                return status.state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn config_from_settings() {
        let cfg = WorkerConfig::from(&RenderWorkerSettings {
            worker_concurrency: 0,
            poll_interval_ms: 250,
            ..Default::default()
        });
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_to_completion() {
        let fx = setup(1, 3);
        let handle = start_worker(config(), fx.queue.clone(), fx.worker.clone());

        let job = fx
            .queue
            .enqueue(job_data(fx.dir.path(), &fx.project_id))
            .unwrap();
        let state = wait_for_terminal(&fx.queue, &job.id).await;
        handle.stop().await;

        assert_eq!(state, JobState::Completed);
        let status = fx.queue.get_status(&job.id).unwrap().unwrap();
        assert_eq!(status.attempts_made, 2);
        assert_eq!(status.progress, 100);
        assert_eq!(
            status.output_path,
            Some(fx.dir.path().join(&fx.project_id).join("video.mp4"))
        );
        assert_eq!(fx.project_status(), ProjectStatus::Complete);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_the_job() {
        let fx = setup(10, 2);
        let handle = start_worker(config(), fx.queue.clone(), fx.worker.clone());

        let job = fx
            .queue
            .enqueue(job_data(fx.dir.path(), &fx.project_id))
            .unwrap();
        let state = wait_for_terminal(&fx.queue, &job.id).await;
        handle.stop().await;

        assert_eq!(state, JobState::Failed);
        let status = fx.queue.get_status(&job.id).unwrap().unwrap();
        assert_eq!(status.attempts_made, 2);
        assert!(status
            .failed_reason
            .unwrap()
            .contains("transient encoder failure"));
        assert_eq!(status.output_path, None);
        assert_eq!(fx.project_status(), ProjectStatus::Failed);
    }

    #[tokio::test]
    async fn project_keeps_rendering_while_retry_is_pending() {
        let fx = setup_with_backoff(1, 2, 3600);
        let queue = fx.queue.clone();
        fx.projects.begin_render(&fx.project_id).unwrap();
        let handle = start_worker(config(), queue.clone(), fx.worker.clone());

        let job = queue
            .enqueue(job_data(fx.dir.path(), &fx.project_id))
            .unwrap();
        for _ in 0..500 {
            let status = queue.get_status(&job.id).unwrap().unwrap();
            if status.state == JobState::Queued && status.attempts_made == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop().await;

        let status = queue.get_status(&job.id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert_eq!(status.attempts_made, 1);
        assert_eq!(fx.project_status(), ProjectStatus::Rendering);
        assert_eq!(
            fx.projects.begin_render(&fx.project_id).unwrap(),
            BeginRender::AlreadyRendering
        );
    }

    #[tokio::test]
    async fn interrupted_last_attempt_fails_the_project() {
        let fx = setup(0, 1);
        assert_eq!(
            fx.projects.begin_render(&fx.project_id).unwrap(),
            BeginRender::Started
        );
        let job = fx
            .queue
            .enqueue(job_data(fx.dir.path(), &fx.project_id))
            .unwrap();
        // Claimed by a process that then died
        fx.queue.claim_next().unwrap().unwrap();

        let handle = start_worker(config(), fx.queue.clone(), fx.worker.clone());
        handle.stop().await;

        let status = fx.queue.get_status(&job.id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(fx.project_status(), ProjectStatus::Failed);
        assert_eq!(
            fx.projects.begin_render(&fx.project_id).unwrap(),
            BeginRender::Started
        );
    }

    #[tokio::test]
    async fn stop_returns_when_idle() {
        let fx = setup(0, 3);
        let handle = start_worker(config(), fx.queue.clone(), fx.worker.clone());

        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .unwrap();
    }
}

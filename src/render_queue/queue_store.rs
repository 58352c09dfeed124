//! SQLite storage for the render queue.

use super::models::*;
use super::schema::RENDER_QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{open_in_memory_db, open_versioned_db};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Durable storage for render jobs.
///
/// Every state transition is a single statement (or transaction), so
/// concurrent workers sharing a store never claim the same job twice.
pub trait RenderQueueStore: Send + Sync {
    fn enqueue(&self, job: &RenderJob) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<RenderJob>>;

    /// Atomically moves the oldest claimable queued job to `active`.
    ///
    /// Only jobs whose `run_after` is not after `now_ms` are considered. The
    /// claimed job has its `attempts_made` incremented.
    fn claim_next(&self, now_ms: i64) -> Result<Option<RenderJob>>;

    /// Ignored unless the job is `active`.
    fn update_progress(&self, id: &str, progress: &JobProgress) -> Result<()>;

    fn mark_completed(&self, id: &str, output_path: &Path, now_ms: i64) -> Result<()>;

    /// Puts an active job back in the queue, claimable from `run_after`.
    fn mark_retry(&self, id: &str, run_after: i64, reason: &str) -> Result<()>;

    fn mark_failed(&self, id: &str, reason: &str, now_ms: i64) -> Result<()>;

    /// Evicts the oldest terminal jobs beyond the given caps.
    ///
    /// Returns the number of deleted rows.
    fn prune_terminal(&self, keep_completed: usize, keep_failed: usize) -> Result<usize>;

    /// Recovers jobs left `active` by a process that died mid-job.
    ///
    /// Jobs with attempts left go back to `queued`, the others to `failed`.
    fn requeue_stale_active(&self, now_ms: i64) -> Result<StaleRecovery>;

    /// Newest first.
    fn list_for_project(&self, project_id: &str) -> Result<Vec<RenderJob>>;

    fn counts(&self) -> Result<QueueCounts>;
}

pub struct SqliteRenderQueueStore {
    conn: Arc<Mutex<Connection>>,
}

const JOB_COLUMNS: &str = "id, payload, state, stage, progress, message, attempts_made, \
     max_attempts, failed_reason, output_path, run_after, created_at, started_at, finished_at";

pub(crate) const INTERRUPTED_REASON: &str = "Render interrupted by server shutdown";

impl SqliteRenderQueueStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(
            db_path.as_ref(),
            RENDER_QUEUE_VERSIONED_SCHEMAS,
            "render queue",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_db(RENDER_QUEUE_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("render queue connection mutex poisoned"))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<RenderJob> {
        let payload: String = row.get("payload")?;
        let data: RenderJobData = serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

        let state_str: String = row.get("state")?;
        let state = JobState::from_db_str(&state_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, format!("state={}", state_str), Type::Text)
        })?;
        let stage_str: String = row.get("stage")?;
        let stage = RenderStage::from_str(&stage_str).unwrap_or(RenderStage::Queued);

        Ok(RenderJob {
            id: row.get("id")?,
            data,
            state,
            progress: JobProgress {
                stage,
                progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
                message: row.get("message")?,
            },
            attempts_made: row.get("attempts_made")?,
            max_attempts: row.get("max_attempts")?,
            failed_reason: row.get("failed_reason")?,
            output_path: row.get::<_, Option<String>>("output_path")?.map(PathBuf::from),
            run_after: row.get("run_after")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }

    fn query_job(conn: &Connection, id: &str) -> Result<Option<RenderJob>> {
        conn.query_row(
            &format!("SELECT {} FROM render_jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .with_context(|| format!("Failed to load render job {}", id))
    }
}

impl RenderQueueStore for SqliteRenderQueueStore {
    fn enqueue(&self, job: &RenderJob) -> Result<()> {
        let payload = serde_json::to_string(&job.data).context("Failed to encode job payload")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO render_jobs (id, project_id, user_id, payload, state, stage, progress, \
             message, attempts_made, max_attempts, run_after, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.data.project_id,
                job.data.user_id,
                payload,
                job.state.as_db_str(),
                job.progress.stage.as_str(),
                job.progress.progress,
                job.progress.message,
                job.attempts_made,
                job.max_attempts,
                job.run_after,
                job.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<RenderJob>> {
        let conn = self.lock()?;
        Self::query_job(&conn, id)
    }

    fn claim_next(&self, now_ms: i64) -> Result<Option<RenderJob>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let next_id: Option<String> = tx
            .query_row(
                "SELECT id FROM render_jobs WHERE state = 'queued' AND run_after <= ?1 \
                 ORDER BY run_after ASC, created_at ASC LIMIT 1",
                params![now_ms],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = next_id else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE render_jobs SET state = 'active', stage = 'processing', progress = 0, \
             message = NULL, attempts_made = attempts_made + 1, started_at = ?2 \
             WHERE id = ?1 AND state = 'queued'",
            params![id, now_ms],
        )?;
        let job = Self::query_job(&tx, &id)?;
        tx.commit()?;
        Ok(job)
    }

    fn update_progress(&self, id: &str, progress: &JobProgress) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE render_jobs SET stage = ?2, progress = ?3, message = ?4 \
             WHERE id = ?1 AND state = 'active'",
            params![
                id,
                progress.stage.as_str(),
                progress.progress.min(100),
                progress.message
            ],
        )?;
        Ok(())
    }

    fn mark_completed(&self, id: &str, output_path: &Path, now_ms: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE render_jobs SET state = 'completed', stage = 'complete', progress = 100, \
             message = NULL, failed_reason = NULL, output_path = ?2, finished_at = ?3 \
             WHERE id = ?1",
            params![id, output_path.to_string_lossy(), now_ms],
        )?;
        Ok(())
    }

    fn mark_retry(&self, id: &str, run_after: i64, reason: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE render_jobs SET state = 'queued', stage = 'queued', progress = 0, \
             message = NULL, failed_reason = ?3, run_after = ?2 WHERE id = ?1",
            params![id, run_after, reason],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: &str, reason: &str, now_ms: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE render_jobs SET state = 'failed', stage = 'failed', failed_reason = ?2, \
             output_path = NULL, finished_at = ?3 WHERE id = ?1",
            params![id, reason, now_ms],
        )?;
        Ok(())
    }

    fn prune_terminal(&self, keep_completed: usize, keep_failed: usize) -> Result<usize> {
        let conn = self.lock()?;
        let mut deleted = 0;
        for (state, keep) in [
            (JobState::Completed, keep_completed),
            (JobState::Failed, keep_failed),
        ] {
            deleted += conn.execute(
                "DELETE FROM render_jobs WHERE state = ?1 AND id NOT IN ( \
                   SELECT id FROM render_jobs WHERE state = ?1 \
                   ORDER BY finished_at DESC, created_at DESC LIMIT ?2)",
                params![state.as_db_str(), keep as i64],
            )?;
        }
        Ok(deleted)
    }

    fn requeue_stale_active(&self, now_ms: i64) -> Result<StaleRecovery> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let failed_projects = {
            let mut stmt = tx.prepare(
                "SELECT project_id FROM render_jobs \
                 WHERE state = 'active' AND attempts_made >= max_attempts",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        tx.execute(
            "UPDATE render_jobs SET state = 'failed', stage = 'failed', failed_reason = ?1, \
             finished_at = ?2 WHERE state = 'active' AND attempts_made >= max_attempts",
            params![INTERRUPTED_REASON, now_ms],
        )?;
        let requeued = tx.execute(
            "UPDATE render_jobs SET state = 'queued', stage = 'queued', progress = 0, \
             message = NULL, failed_reason = ?1, run_after = ?2 WHERE state = 'active'",
            params![INTERRUPTED_REASON, now_ms],
        )?;
        tx.commit()?;
        Ok(StaleRecovery {
            requeued,
            failed_projects,
        })
    }

    fn list_for_project(&self, project_id: &str) -> Result<Vec<RenderJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM render_jobs WHERE project_id = ?1 ORDER BY created_at DESC",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![project_id], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn counts(&self) -> Result<QueueCounts> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM render_jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row?;
            match JobState::from_db_str(&state) {
                Some(JobState::Queued) => counts.queued = count,
                Some(JobState::Active) => counts.active = count,
                Some(JobState::Completed) => counts.completed = count,
                Some(JobState::Failed) => counts.failed = count,
                None => {}
            }
        }
        Ok(counts)
    }
}

//! Data models for the render queue.
//!
//! Defines the job payload, job states, pipeline stages and the status view
//! exposed to clients.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a render job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed, // terminal
    Failed,    // terminal
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

/// Named phase of job execution, observable while the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderStage {
    Queued,
    Processing,
    Capturing,
    AiGenerating,
    Encoding,
    Complete,
    Failed,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Queued => "queued",
            RenderStage::Processing => "processing",
            RenderStage::Capturing => "capturing",
            RenderStage::AiGenerating => "ai-generating",
            RenderStage::Encoding => "encoding",
            RenderStage::Complete => "complete",
            RenderStage::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RenderStage::Queued),
            "processing" => Some(RenderStage::Processing),
            "capturing" => Some(RenderStage::Capturing),
            "ai-generating" => Some(RenderStage::AiGenerating),
            "encoding" => Some(RenderStage::Encoding),
            "complete" => Some(RenderStage::Complete),
            "failed" => Some(RenderStage::Failed),
            _ => None,
        }
    }
}

/// Structured progress of an active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub stage: RenderStage,
    /// 0-100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgress {
    pub fn new(stage: RenderStage, progress: u8) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// AI-hybrid parameters. Only present for jobs rendered from generated images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiHybridSettings {
    pub sd_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd_negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd_model: Option<String>,
    pub beat_timestamps: Vec<f64>,
    pub duration: f64,
}

/// Rendering pipeline selected for a job, keyed by `mode` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum RenderMode {
    Procedural {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    AiHybrid(AiHybridSettings),
}

impl RenderMode {
    pub fn name(&self) -> &'static str {
        match self {
            RenderMode::Procedural { .. } => "procedural",
            RenderMode::AiHybrid(_) => "ai-hybrid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub mode: RenderMode,
}

/// Payload of a render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJobData {
    pub project_id: String,
    pub user_id: String,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub settings: RenderSettings,
}

/// A persisted render job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub id: String,
    pub data: RenderJobData,
    pub state: JobState,
    pub progress: JobProgress,
    /// Attempts started so far, including the running one.
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub failed_reason: Option<String>,
    pub output_path: Option<PathBuf>,
    /// Epoch millis before which the job must not be claimed.
    pub run_after: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl RenderJob {
    pub fn new(data: RenderJobData, max_attempts: u32, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data,
            state: JobState::Queued,
            progress: JobProgress::new(RenderStage::Queued, 0),
            attempts_made: 0,
            max_attempts,
            failed_reason: None,
            output_path: None,
            run_after: now_ms,
            created_at: now_ms,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            state: self.state,
            stage: self.progress.stage,
            progress: self.progress.progress,
            message: self.progress.message.clone(),
            failed_reason: self.failed_reason.clone(),
            attempts_made: self.attempts_made,
            output_path: self.output_path.clone(),
        }
    }
}

/// Returned by `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: String,
}

/// Client-facing snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub state: JobState,
    pub stage: RenderStage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub failed_reason: Option<String>,
    pub attempts_made: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

/// Number of jobs per state, for the stats endpoint and the queue gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Back in the queue, claimable from `run_after` (epoch millis).
    Retrying { run_after: i64 },
    Failed,
}

/// Jobs found `active` when a worker starts, left behind by a dead process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleRecovery {
    pub requeued: usize,
    /// Projects whose interrupted job had no attempts left and was failed.
    pub failed_projects: Vec<String>,
}

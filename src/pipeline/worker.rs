//! The render state machine: one job, end to end.

use super::bounded::run_bounded;
use super::capture::{capture_frames, has_frames, CaptureRequest, CaptureTarget, RenderSurface};
use super::compositor::{EncodeInput, EncodeRequest, SectionImage, VideoEncoder};
use super::image_gen::{ImageGenError, ImageGenerator, ImageRequest};
use super::sections::{build_sections, section_durations};
use crate::config::AiSettings;
use crate::projects::{ProjectStatus, ProjectStore};
use crate::render_queue::{AiHybridSettings, JobProgress, RenderJob, RenderMode, RenderStage};
use crate::server::metrics;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Seed stride between consecutive AI sections.
const SEED_STRIDE: u64 = 137;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Image generation failed for section {index}: {message}")]
    ImageGeneration { index: usize, message: String },

    #[error("Encoding failed: {0}")]
    Encoder(String),

    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Invalid render job: {0}")]
    InvalidJob(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderError {
    /// Invalid jobs fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RenderError::InvalidJob(_))
    }
}

/// Receives stage/progress updates while a job runs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: JobProgress);
}

/// Maps a 0..=100 sub-progress into `[start, end]` of the overall bar.
fn scaled(start: u8, end: u8, percent: f64) -> u8 {
    let span = (end - start) as f64;
    (start as f64 + span * percent.clamp(0.0, 100.0) / 100.0).round() as u8
}

pub struct RenderWorker {
    projects: Arc<dyn ProjectStore>,
    surface: Arc<dyn RenderSurface>,
    encoder: Arc<dyn VideoEncoder>,
    image_generator: Option<Arc<dyn ImageGenerator>>,
    ai: AiSettings,
    default_duration_secs: f64,
}

impl RenderWorker {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        surface: Arc<dyn RenderSurface>,
        encoder: Arc<dyn VideoEncoder>,
        image_generator: Option<Arc<dyn ImageGenerator>>,
        ai: AiSettings,
        default_duration_secs: f64,
    ) -> Self {
        Self {
            projects,
            surface,
            encoder,
            image_generator,
            ai,
            default_duration_secs,
        }
    }

    /// Runs one attempt of `job`. The project is marked `rendering` on entry
    /// and `complete` with the output path on success. It stays `rendering`
    /// on error, see `mark_project_failed`.
    pub async fn process(
        &self,
        job: &RenderJob,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, RenderError> {
        let project_id = &job.data.project_id;
        sink.report(JobProgress::new(RenderStage::Processing, 0));

        let result = match self.projects.set_status(project_id, ProjectStatus::Rendering) {
            Ok(true) => self.run_pipeline(job, sink).await,
            Ok(false) => Err(RenderError::InvalidJob(format!(
                "Project {} not found",
                project_id
            ))),
            Err(e) => Err(RenderError::Other(e)),
        };

        match &result {
            Ok(output) => {
                if let Err(e) = self.projects.mark_render_complete(project_id, output) {
                    warn!(project_id = %project_id, "Failed to mark project complete: {}", e);
                }
                sink.report(JobProgress::new(RenderStage::Complete, 100));
                info!(job_id = %job.id, project_id = %project_id, "Render complete: {:?}", output);
            }
            Err(err) => {
                warn!(job_id = %job.id, project_id = %project_id, "Render attempt failed: {}", err);
            }
        }
        result
    }

    /// Called once the queue gives up on a project's job. Until then a
    /// failed attempt leaves the project `rendering`.
    pub fn mark_project_failed(&self, project_id: &str) {
        match self.projects.mark_render_failed(project_id) {
            Ok(true) => {}
            Ok(false) => warn!(project_id = %project_id, "Failed render for a missing project"),
            Err(e) => warn!(project_id = %project_id, "Failed to mark project failed: {}", e),
        }
    }

    async fn run_pipeline(
        &self,
        job: &RenderJob,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, RenderError> {
        let output_path = &job.data.output_path;
        let output_dir = output_path
            .parent()
            .ok_or_else(|| RenderError::InvalidJob(format!("Bad output path {:?}", output_path)))?;
        tokio::fs::create_dir_all(output_dir).await?;

        match &job.data.settings.mode {
            RenderMode::Procedural { duration } => {
                self.render_procedural(job, output_dir, *duration, sink).await
            }
            RenderMode::AiHybrid(settings) => {
                self.render_ai_hybrid(job, output_dir, settings, sink).await
            }
        }
    }

    fn procedural_duration(&self, project_id: &str, requested: Option<f64>) -> f64 {
        if let Some(d) = requested.filter(|d| d.is_finite() && *d > 0.0) {
            return d;
        }
        match self.projects.get(project_id) {
            Ok(Some(project)) => project
                .audio_metadata
                .map(|m| m.duration)
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(self.default_duration_secs),
            _ => self.default_duration_secs,
        }
    }

    async fn render_procedural(
        &self,
        job: &RenderJob,
        output_dir: &Path,
        requested_duration: Option<f64>,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, RenderError> {
        let data = &job.data;
        let settings = &data.settings;
        let frames_dir = output_dir.join("frames");
        let duration = self.procedural_duration(&data.project_id, requested_duration);

        let mut encode_start = 10;
        let input = if has_frames(&frames_dir).await {
            info!(job_id = %job.id, "Using pre-supplied frames in {:?}", frames_dir);
            EncodeInput::FrameSequence {
                frames_dir: frames_dir.clone(),
                fps: settings.fps,
            }
        } else {
            sink.report(JobProgress::new(RenderStage::Capturing, 5));
            let request = CaptureRequest {
                target: CaptureTarget {
                    project_id: data.project_id.clone(),
                    width: settings.width,
                    height: settings.height,
                },
                output_dir: frames_dir.clone(),
                fps: settings.fps,
                duration,
            };
            let on_capture = |fraction: f64| {
                sink.report(JobProgress::new(
                    RenderStage::Capturing,
                    scaled(5, 45, fraction * 100.0),
                ));
            };
            match capture_frames(self.surface.as_ref(), &request, &on_capture).await {
                Ok(outcome) if outcome.frames_captured > 0 => {
                    metrics::record_frames_captured(outcome.frames_captured);
                    encode_start = 45;
                    EncodeInput::FrameSequence {
                        frames_dir: frames_dir.clone(),
                        fps: settings.fps,
                    }
                }
                Ok(_) => {
                    warn!(job_id = %job.id, "No frames captured, encoding black video");
                    metrics::record_black_fallback();
                    EncodeInput::BlackFrame { fps: settings.fps }
                }
                Err(e) => {
                    let err = RenderError::Capture(format!("{:#}", e));
                    warn!(job_id = %job.id, "{}, encoding black video", err);
                    metrics::record_black_fallback();
                    EncodeInput::BlackFrame { fps: settings.fps }
                }
            }
        };

        let request = EncodeRequest {
            input,
            audio_path: data.audio_path.clone(),
            output_path: data.output_path.clone(),
            width: settings.width,
            height: settings.height,
            duration: Some(duration),
        };
        self.encode(&request, encode_start, sink).await?;

        if let Err(e) = tokio::fs::remove_dir_all(&frames_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove frames dir {:?}: {}", frames_dir, e);
            }
        }
        Ok(data.output_path.clone())
    }

    async fn render_ai_hybrid(
        &self,
        job: &RenderJob,
        output_dir: &Path,
        ai: &AiHybridSettings,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, RenderError> {
        let generator = self.image_generator.clone().ok_or_else(|| {
            RenderError::InvalidJob("AI image generation is not configured".to_string())
        })?;

        let mut beats = ai.beat_timestamps.clone();
        beats.sort_by(f64::total_cmp);
        let boundaries = build_sections(&beats, ai.duration, self.ai.beats_per_image);
        let durations = section_durations(&boundaries);
        if durations.is_empty() {
            return Err(RenderError::InvalidJob(format!(
                "No sections to render for a {:.3}s track",
                ai.duration
            )));
        }

        let work_dir = output_dir.join(format!("ai-frames-{}", job.id));
        tokio::fs::create_dir_all(&work_dir).await?;
        let result = self
            .generate_and_encode(job, &work_dir, ai, generator, &durations, sink)
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!("Failed to remove AI frames dir {:?}: {}", work_dir, e);
        }
        result
    }

    async fn generate_and_encode(
        &self,
        job: &RenderJob,
        work_dir: &Path,
        ai: &AiHybridSettings,
        generator: Arc<dyn ImageGenerator>,
        durations: &[f64],
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, RenderError> {
        let data = &job.data;
        let total = durations.len();
        info!(job_id = %job.id, sections = total, "Generating AI images");
        sink.report(JobProgress::new(RenderStage::AiGenerating, 0));

        let prompt = if ai.sd_prompt.trim().is_empty() {
            self.ai.default_prompt.clone()
        } else {
            ai.sd_prompt.clone()
        };
        let negative_prompt = ai
            .sd_negative_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.ai.default_negative_prompt.clone());

        let completed = AtomicUsize::new(0);
        let tasks: Vec<_> = (0..total)
            .map(|index| {
                let generator = generator.clone();
                let request = ImageRequest {
                    prompt: prompt.clone(),
                    negative_prompt: negative_prompt.clone(),
                    width: self.ai.image_width,
                    height: self.ai.image_height,
                    steps: self.ai.steps,
                    guidance: self.ai.guidance,
                    seed: index as u64 * SEED_STRIDE,
                    model: ai.sd_model.clone(),
                };
                let dest = work_dir.join(format!("ai-frame-{:04}.jpg", index));
                let completed = &completed;
                move || async move {
                    let path = generator
                        .generate(&request, &dest)
                        .await
                        .map_err(|e: ImageGenError| RenderError::ImageGeneration {
                            index,
                            message: e.to_string(),
                        })?;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    sink.report(JobProgress::new(
                        RenderStage::AiGenerating,
                        scaled(0, 70, done as f64 * 100.0 / total as f64),
                    ));
                    Ok::<_, RenderError>(path)
                }
            })
            .collect();

        let paths = run_bounded(tasks, self.ai.max_concurrent.max(1)).await?;
        metrics::record_images_generated(paths.len());

        let images = paths
            .into_iter()
            .zip(durations.iter())
            .map(|(path, duration)| SectionImage {
                path,
                duration: *duration,
            })
            .collect();
        let request = EncodeRequest {
            input: EncodeInput::ImageSections {
                images,
                fps: data.settings.fps,
            },
            audio_path: data.audio_path.clone(),
            output_path: data.output_path.clone(),
            width: data.settings.width,
            height: data.settings.height,
            duration: Some(ai.duration),
        };
        self.encode(&request, 70, sink).await?;
        Ok(data.output_path.clone())
    }

    async fn encode(
        &self,
        request: &EncodeRequest,
        start: u8,
        sink: &dyn ProgressSink,
    ) -> Result<(), RenderError> {
        sink.report(JobProgress::new(RenderStage::Encoding, start));
        let on_encode = |percent: u8| {
            sink.report(JobProgress::new(
                RenderStage::Encoding,
                scaled(start, 100, percent as f64),
            ));
        };
        self.encoder
            .encode(request, &on_encode)
            .await
            .map_err(|e| RenderError::Encoder(format!("{:#}", e)))
    }
}

//! In-process stand-ins for the browser, ffmpeg, the image API, the analysis
//! script and the LLM.

use super::constants::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use audioviz_render_server::analyzer::{AnalysisResult, AudioAnalyzer};
use audioviz_render_server::pipeline::{
    CaptureTarget, EncodeInput, EncodeRequest, ImageGenError, ImageGenerator, ImageRequest,
    RenderSurface, SurfaceSession, VideoEncoder,
};
use audioviz_render_server::projects::ProjectRenderMode;
use audioviz_render_server::style_advisor::{
    AdvisorError, AudioSummary, StyleAdvisor, StyleSuggestion, StyleSuggestionResponse,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Smallest byte sequence `infer` recognizes as a JPEG.
pub const JPEG_BYTES: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

// =============================================================================
// Render Surface
// =============================================================================

pub struct FakeSurface {
    pub fail_launch: bool,
}

struct FakeSession;

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn launch(&self, _target: &CaptureTarget) -> Result<Box<dyn SurfaceSession>> {
        if self.fail_launch {
            bail!("browser not available");
        }
        Ok(Box::new(FakeSession))
    }
}

#[async_trait]
impl SurfaceSession for FakeSession {
    async fn render_frame(&mut self, _time: f64, out_path: &Path) -> Result<bool> {
        tokio::fs::write(out_path, JPEG_BYTES).await?;
        Ok(true)
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// What the encoder was asked to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideo {
    pub kind: &'static str,
    /// Frames on disk (frame sequences) or images (sections) at encode time.
    pub inputs: usize,
    pub section_durations: Vec<f64>,
    pub output_path: PathBuf,
}

#[derive(Default)]
pub struct FakeEncoder {
    encoded: Mutex<Vec<EncodedVideo>>,
    /// Number of upcoming encodes that fail before any output is written.
    failures_left: AtomicUsize,
}

impl FakeEncoder {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    pub fn encoded(&self) -> Vec<EncodedVideo> {
        self.encoded.lock().unwrap().clone()
    }
}

fn count_jpegs(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".jpg"))
                .count()
        })
        .unwrap_or(0)
}

#[async_trait]
impl VideoEncoder for FakeEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("encoder crashed");
        }

        let (inputs, section_durations) = match &request.input {
            EncodeInput::FrameSequence { frames_dir, .. } => (count_jpegs(frames_dir), vec![]),
            EncodeInput::ImageSections { images, .. } => {
                for image in images {
                    if !image.path.exists() {
                        bail!("missing section image {:?}", image.path);
                    }
                }
                (images.len(), images.iter().map(|i| i.duration).collect())
            }
            EncodeInput::BlackFrame { .. } => (0, vec![]),
        };
        self.encoded.lock().unwrap().push(EncodedVideo {
            kind: request.input.kind(),
            inputs,
            section_durations,
            output_path: request.output_path.clone(),
        });

        on_progress(50);
        tokio::fs::write(&request.output_path, b"fake mp4").await?;
        on_progress(100);
        Ok(())
    }
}

// =============================================================================
// Image Generator
// =============================================================================

pub struct FakeImageGenerator {
    pub failing_seed: Option<u64>,
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate(
        &self,
        request: &ImageRequest,
        dest: &Path,
    ) -> Result<PathBuf, ImageGenError> {
        if self.failing_seed == Some(request.seed) {
            return Err(ImageGenError::PredictionFailed("NSFW content detected".into()));
        }
        tokio::fs::write(dest, JPEG_BYTES)
            .await
            .map_err(|e| ImageGenError::Download(e.to_string()))?;
        Ok(dest.to_path_buf())
    }
}

// =============================================================================
// Analyzer
// =============================================================================

pub struct FakeAnalyzer;

#[async_trait]
impl AudioAnalyzer for FakeAnalyzer {
    async fn analyze(&self, _audio_path: &Path) -> AnalysisResult {
        AnalysisResult {
            success: true,
            error: None,
            duration: Some(TEST_TRACK_DURATION),
            bpm: Some(60.0),
            beats: TEST_TRACK_BEATS.to_vec(),
            onsets: vec![0.5, 2.5],
            peaks: vec![3.0],
        }
    }
}

// =============================================================================
// Style Advisor
// =============================================================================

pub struct FakeStyleAdvisor;

#[async_trait]
impl StyleAdvisor for FakeStyleAdvisor {
    async fn suggest_styles(
        &self,
        summary: &AudioSummary,
    ) -> Result<StyleSuggestionResponse, AdvisorError> {
        Ok(StyleSuggestionResponse {
            overall_mood: format!("steady, {} beats", summary.beat_count),
            recommended_mode: ProjectRenderMode::AiHybrid,
            suggestions: vec![StyleSuggestion {
                style_id: "particles".to_string(),
                score: 0.9,
                explanation: "Even pulse".to_string(),
                suggested_prompt: "glowing particles".to_string(),
                suggested_palette: vec!["#ff0000".to_string()],
            }],
        })
    }

    async fn refine_prompt(
        &self,
        prompt: &str,
        _summary: &AudioSummary,
    ) -> Result<String, AdvisorError> {
        Ok(format!("{}, cinematic lighting", prompt))
    }
}

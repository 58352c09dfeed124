//! Frame capture: drives a headless rendering surface across a timeline.

use crate::config::CaptureSettings;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What the surface should show: one project at a fixed viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTarget {
    pub project_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub target: CaptureTarget,
    pub output_dir: PathBuf,
    pub fps: u32,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub total_frames: usize,
    pub frames_captured: usize,
    /// Frames screenshotted without having seen the ready signal.
    pub missed_ready: usize,
}

/// A rendering surface able to show a project's visual state at any time.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Fails when the surface cannot be started at all.
    async fn launch(&self, target: &CaptureTarget) -> Result<Box<dyn SurfaceSession>>;
}

#[async_trait]
pub trait SurfaceSession: Send {
    /// Shows the state at `time` and writes a JPEG still to `out_path`.
    ///
    /// Returns whether the ready signal was seen before the screenshot.
    async fn render_frame(&mut self, time: f64, out_path: &Path) -> Result<bool>;

    async fn close(self: Box<Self>) {}
}

pub fn frame_file_name(index: usize) -> String {
    format!("frame-{:05}.jpg", index)
}

/// ffmpeg input pattern matching `frame_file_name`.
pub const FRAME_PATTERN: &str = "frame-%05d.jpg";

pub fn total_frames(duration: f64, fps: u32) -> usize {
    let frames = (duration * fps as f64).ceil();
    if frames.is_finite() && frames > 0.0 {
        frames as usize
    } else {
        0
    }
}

/// Whether `dir` already holds captured or uploaded frames.
pub async fn has_frames(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(".jpg") {
            return true;
        }
    }
    false
}

/// Captures `ceil(duration * fps)` frames named `frame-00000.jpg`, ...
///
/// `on_progress` receives the completed fraction (0..=1) after each frame.
/// Errors mean the capture as a whole failed: the surface did not start, or
/// a frame could not be written. A missed ready signal is not an error.
pub async fn capture_frames(
    surface: &dyn RenderSurface,
    request: &CaptureRequest,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<CaptureOutcome> {
    tokio::fs::create_dir_all(&request.output_dir)
        .await
        .with_context(|| format!("Failed to create frames dir {:?}", request.output_dir))?;

    let mut outcome = CaptureOutcome {
        total_frames: total_frames(request.duration, request.fps),
        ..Default::default()
    };

    let mut session = surface
        .launch(&request.target)
        .await
        .context("Failed to start render surface")?;
    let result = capture_all(session.as_mut(), request, &mut outcome, on_progress).await;
    session.close().await;
    result?;

    if outcome.missed_ready > 0 {
        warn!(
            project_id = %request.target.project_id,
            "{} of {} frames captured without ready signal",
            outcome.missed_ready,
            outcome.total_frames
        );
    }
    info!(
        project_id = %request.target.project_id,
        frames = outcome.frames_captured,
        "Frame capture finished"
    );
    Ok(outcome)
}

async fn capture_all(
    session: &mut dyn SurfaceSession,
    request: &CaptureRequest,
    outcome: &mut CaptureOutcome,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<()> {
    let total = outcome.total_frames;
    for index in 0..total {
        let time = index as f64 / request.fps as f64;
        let path = request.output_dir.join(frame_file_name(index));
        let ready = session
            .render_frame(time, &path)
            .await
            .with_context(|| format!("Failed to capture frame {} at {:.3}s", index, time))?;
        if !ready {
            debug!("Frame {} captured without ready signal", index);
            outcome.missed_ready += 1;
        }
        outcome.frames_captured += 1;
        on_progress((index + 1) as f64 / total as f64);
    }
    Ok(())
}

// =============================================================================
// Headless Chromium
// =============================================================================

const READY_MARKER: &str = "data-status=\"ready\"";
const CONTAINER_MARKER: &str = "id=\"render-container\"";
/// Wall-clock slack on top of the virtual-time budget of one browser run.
const PROCESS_SLACK: Duration = Duration::from_secs(10);

/// Renders frames by pointing a headless Chromium at the client's render page.
///
/// Each frame runs the browser twice: a `--dump-dom` probe waiting for the
/// render container to report ready, then a `--screenshot`. Chromium writes
/// PNG, so the screenshot is re-encoded to JPEG with ffmpeg.
pub struct ChromiumSurface {
    chromium_path: PathBuf,
    ffmpeg_path: PathBuf,
    client_url: String,
    ready_timeout: Duration,
    settle_delay: Duration,
    jpeg_quality: u8,
}

impl ChromiumSurface {
    pub fn new(settings: &CaptureSettings, ffmpeg_path: PathBuf) -> Self {
        Self {
            chromium_path: settings.chromium_path.clone(),
            ffmpeg_path,
            client_url: settings.client_url.trim_end_matches('/').to_string(),
            ready_timeout: Duration::from_millis(settings.ready_timeout_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            jpeg_quality: settings.jpeg_quality,
        }
    }
}

#[async_trait]
impl RenderSurface for ChromiumSurface {
    async fn launch(&self, target: &CaptureTarget) -> Result<Box<dyn SurfaceSession>> {
        let status = Command::new(&self.chromium_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run {:?}", self.chromium_path))?;
        if !status.success() {
            bail!("{:?} --version exited with {}", self.chromium_path, status);
        }

        Ok(Box::new(ChromiumSession {
            chromium_path: self.chromium_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            client_url: self.client_url.clone(),
            target: target.clone(),
            ready_timeout: self.ready_timeout,
            settle_delay: self.settle_delay,
            qscale: jpeg_qscale(self.jpeg_quality),
        }))
    }
}

struct ChromiumSession {
    chromium_path: PathBuf,
    ffmpeg_path: PathBuf,
    client_url: String,
    target: CaptureTarget,
    ready_timeout: Duration,
    settle_delay: Duration,
    qscale: u8,
}

impl ChromiumSession {
    fn browser_command(&self) -> Command {
        let mut command = Command::new(&self.chromium_path);
        command
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--hide-scrollbars",
                "--enable-webgl",
                "--use-gl=egl",
            ])
            .arg(format!(
                "--window-size={},{}",
                self.target.width, self.target.height
            ))
            .arg(format!(
                "--virtual-time-budget={}",
                self.ready_timeout.as_millis()
            ))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    async fn wait_ready(&self, url: &str) -> bool {
        let mut command = self.browser_command();
        command.arg("--dump-dom").arg(url);
        let run = tokio::time::timeout(self.ready_timeout + PROCESS_SLACK, command.output());
        match run.await {
            Ok(Ok(output)) if output.status.success() => {
                is_ready_dom(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!("Ready probe exited with {}", output.status);
                false
            }
            Ok(Err(e)) => {
                debug!("Ready probe failed to run: {}", e);
                false
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SurfaceSession for ChromiumSession {
    async fn render_frame(&mut self, time: f64, out_path: &Path) -> Result<bool> {
        let url = capture_url(&self.client_url, &self.target, time);
        let ready = self.wait_ready(&url).await;
        tokio::time::sleep(self.settle_delay).await;

        let png_path = out_path.with_extension("png");
        let mut command = self.browser_command();
        command
            .arg(format!("--screenshot={}", png_path.display()))
            .arg(&url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let output = tokio::time::timeout(self.ready_timeout + PROCESS_SLACK, command.output())
            .await
            .context("Screenshot timed out")?
            .context("Failed to run screenshot")?;
        if !output.status.success() {
            bail!(
                "Screenshot exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(&png_path)
            .args(["-q:v", &self.qscale.to_string()])
            .arg(out_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run ffmpeg for JPEG conversion")?;
        let _ = tokio::fs::remove_file(&png_path).await;
        if !output.status.success() {
            bail!(
                "JPEG conversion failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(ready)
    }
}

pub fn capture_url(client_url: &str, target: &CaptureTarget, time: f64) -> String {
    format!(
        "{}/render?projectId={}&time={}&width={}&height={}",
        client_url,
        urlencoding::encode(&target.project_id),
        time,
        target.width,
        target.height
    )
}

fn is_ready_dom(dom: &str) -> bool {
    dom.lines()
        .any(|line| line.contains(CONTAINER_MARKER) && line.contains(READY_MARKER))
}

/// Maps a 1-100 JPEG quality to ffmpeg's 2-31 `-q:v` scale (lower is better).
fn jpeg_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (2 + (100 - quality) * 29 / 99) as u8
}

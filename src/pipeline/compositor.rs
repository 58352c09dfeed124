//! Video compositing: muxes stills and an audio track with ffmpeg.

use super::capture::FRAME_PATTERN;
use crate::config::EncoderSettings;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Shortest display time for one image section, in seconds.
const MIN_SECTION_SECS: f64 = 0.1;
/// Number of stderr bytes kept for error messages.
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct SectionImage {
    pub path: PathBuf,
    /// Seconds the image stays on screen.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeInput {
    /// `frame-%05d.jpg` files in `frames_dir`, shown at `fps`.
    FrameSequence { frames_dir: PathBuf, fps: u32 },
    /// One image per section, each held for its duration.
    ImageSections { images: Vec<SectionImage>, fps: u32 },
    /// Plain black picture for the whole track.
    BlackFrame { fps: u32 },
}

impl EncodeInput {
    pub fn kind(&self) -> &'static str {
        match self {
            EncodeInput::FrameSequence { .. } => "frame-sequence",
            EncodeInput::ImageSections { .. } => "image-sections",
            EncodeInput::BlackFrame { .. } => "black-frame",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub input: EncodeInput,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Nominal track length. Image sections are clamped to it, and it is the
    /// reference for progress when known.
    pub duration: Option<f64>,
}

#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encodes `request`, reporting integer percent complete.
    async fn encode(
        &self,
        request: &EncodeRequest,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()>;
}

pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    audio_bitrate: String,
    crf: u8,
    preset: String,
}

impl FfmpegEncoder {
    pub fn new(settings: &EncoderSettings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            audio_bitrate: settings.audio_bitrate.clone(),
            crf: settings.crf,
            preset: settings.preset.clone(),
        }
    }

    /// Full ffmpeg argument list. `concat_list` is the demuxer file for
    /// image sections.
    pub fn build_args(&self, request: &EncodeRequest, concat_list: Option<&Path>) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-nostats"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(["-progress".to_string(), "pipe:1".to_string()]);

        let (width, height) = (request.width, request.height);
        let fps = match &request.input {
            EncodeInput::FrameSequence { frames_dir, fps } => {
                args.extend([
                    "-framerate".to_string(),
                    fps.to_string(),
                    "-i".to_string(),
                    frames_dir.join(FRAME_PATTERN).to_string_lossy().into_owned(),
                ]);
                *fps
            }
            EncodeInput::ImageSections { fps, .. } => {
                let list = concat_list
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                args.extend(
                    ["-f", "concat", "-safe", "0", "-i", list.as_str()].map(String::from),
                );
                *fps
            }
            EncodeInput::BlackFrame { fps } => {
                args.extend([
                    "-f".to_string(),
                    "lavfi".to_string(),
                    "-i".to_string(),
                    format!("color=c=black:s={}x{}:r={}", width, height, fps),
                ]);
                *fps
            }
        };

        args.extend([
            "-i".to_string(),
            request.audio_path.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-vf".to_string(),
            fit_filter(width, height),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
        ]);
        if matches!(request.input, EncodeInput::BlackFrame { .. }) {
            args.extend(["-tune".to_string(), "stillimage".to_string()]);
        }
        args.extend(
            [
                "-c:a",
                "aac",
                "-b:a",
                self.audio_bitrate.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-r",
            ]
            .map(String::from),
        );
        args.push(fps.to_string());

        match (&request.input, request.duration) {
            (EncodeInput::ImageSections { .. }, Some(duration)) => {
                args.extend([
                    "-t".to_string(),
                    format!("{:.3}", duration),
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                ]);
            }
            (EncodeInput::ImageSections { .. }, None) => {
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
            }
            _ => args.push("-shortest".to_string()),
        }

        args.push(request.output_path.to_string_lossy().into_owned());
        args
    }

    async fn run(
        &self,
        args: &[String],
        duration: Option<f64>,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        debug!("Running {:?} {}", self.ffmpeg_path, args.join(" "));
        let mut child = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", self.ffmpeg_path))?;

        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
        let mut stderr = child.stderr.take().context("ffmpeg stderr not captured")?;

        // Drained concurrently so a chatty ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_percent = None;
        while let Some(line) = lines.next_line().await? {
            if let Some(percent) = parse_progress_line(&line, duration) {
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    on_progress(percent);
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for ffmpeg")?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let text = String::from_utf8_lossy(&stderr);
            let tail_start = text.len().saturating_sub(STDERR_TAIL);
            let tail = text
                .get(tail_start..)
                .unwrap_or(text.as_ref())
                .trim()
                .to_string();
            bail!("ffmpeg exited with {}: {}", status, tail);
        }
        if last_percent != Some(100) {
            on_progress(100);
        }
        Ok(())
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create output dir {:?}", parent))?;
        }

        let mut concat_list = None;
        let mut duration = request.duration;
        if let EncodeInput::ImageSections { images, .. } = &request.input {
            if images.is_empty() {
                bail!("No images to composite");
            }
            let list_path = request.output_path.with_file_name(format!(
                "concat-{}.txt",
                uuid::Uuid::new_v4().simple()
            ));
            let cwd = std::env::current_dir().context("Failed to read the working directory")?;
            tokio::fs::write(&list_path, concat_file(images, &cwd))
                .await
                .with_context(|| format!("Failed to write concat list {:?}", list_path))?;
            if duration.is_none() {
                duration = Some(images.iter().map(|i| i.duration.max(MIN_SECTION_SECS)).sum());
            }
            concat_list = Some(list_path);
        }

        let args = self.build_args(request, concat_list.as_deref());
        let result = self.run(&args, duration, on_progress).await;

        if let Some(list_path) = concat_list {
            if let Err(e) = tokio::fs::remove_file(&list_path).await {
                warn!("Failed to remove concat list {:?}: {}", list_path, e);
            }
        }
        result
    }
}

/// Scales to fit inside the target while keeping the aspect ratio, then pads
/// to the exact size.
fn fit_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
        w = width,
        h = height
    )
}

/// Concat demuxer list. The last file is listed twice: the demuxer ignores
/// the duration of the final entry otherwise.
///
/// The demuxer resolves relative entries against the list's own directory,
/// so relative image paths are written joined onto `cwd`.
pub fn concat_file(images: &[SectionImage], cwd: &Path) -> String {
    let mut lines = Vec::with_capacity(images.len() * 2 + 1);
    for image in images {
        lines.push(format!("file '{}'", concat_entry(&image.path, cwd)));
        lines.push(format!(
            "duration {:.3}",
            image.duration.max(MIN_SECTION_SECS)
        ));
    }
    if let Some(last) = images.last() {
        lines.push(format!("file '{}'", concat_entry(&last.path, cwd)));
    }
    lines.join("\n") + "\n"
}

fn concat_entry(path: &Path, cwd: &Path) -> String {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Turns one `-progress` line into percent complete.
///
/// Only `out_time_ms` (microseconds, despite the name) and `progress=end`
/// lines matter; without a known duration only the end is reported.
pub fn parse_progress_line(line: &str, duration: Option<f64>) -> Option<u8> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "progress" if value == "end" => Some(100),
        "out_time_ms" | "out_time_us" => {
            let duration = duration.filter(|d| *d > 0.0)?;
            let micros: f64 = value.parse().ok()?;
            let percent = (micros / 1_000_000.0 / duration * 100.0).clamp(0.0, 100.0);
            Some(percent.floor() as u8)
        }
        _ => None,
    }
}

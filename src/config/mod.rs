mod file_config;

pub use file_config::{
    AiConfig, AnalyzerConfig, CaptureConfig, EncoderConfig, FileConfig, RenderConfig,
    StyleAdvisorConfig,
};

use crate::projects::{DEFAULT_NEGATIVE_PROMPT, DEFAULT_SD_MODEL};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const DEFAULT_AI_PROMPT: &str = "abstract colorful music visualization, dynamic motion blur";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub worker_concurrency: Option<usize>,
    pub client_url: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub chromium_path: Option<PathBuf>,
    pub python_path: Option<PathBuf>,
    pub analyzer_script: Option<PathBuf>,
    pub replicate_api_token: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub output_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Feature configs (with defaults)
    pub render: RenderWorkerSettings,
    pub ai: AiSettings,
    pub capture: CaptureSettings,
    pub encoder: EncoderSettings,
    pub analyzer: AnalyzerSettings,
    pub style_advisor: StyleAdvisorSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        let db_dir = absolute(db_dir)?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone())
            .unwrap_or_else(|| db_dir.join("outputs"));
        let output_dir = absolute(output_dir)?;

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let render = RenderWorkerSettings::resolve(cli, file.render.unwrap_or_default());
        if render.backoff_multiplier < 1.0 {
            bail!(
                "render.backoff_multiplier must be at least 1.0, got {}",
                render.backoff_multiplier
            );
        }
        if render.default_fps == 0 {
            bail!("render.default_fps must be positive");
        }

        let ai = AiSettings::resolve(cli, file.ai.unwrap_or_default());
        let capture = CaptureSettings::resolve(cli, file.capture.unwrap_or_default());
        let encoder = EncoderSettings::resolve(cli, file.encoder.unwrap_or_default());
        let analyzer = AnalyzerSettings::resolve(cli, file.analyzer.unwrap_or_default());
        let style_advisor =
            StyleAdvisorSettings::resolve(cli, file.style_advisor.unwrap_or_default());

        Ok(Self {
            db_dir,
            output_dir,
            port,
            metrics_port,
            logging_level,
            render,
            ai,
            capture,
            encoder,
            analyzer,
            style_advisor,
        })
    }

    pub fn render_queue_db_path(&self) -> PathBuf {
        self.db_dir.join("render_queue.db")
    }

    pub fn projects_db_path(&self) -> PathBuf {
        self.db_dir.join("projects.db")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderWorkerSettings {
    pub worker_concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: u64,
    pub retain_completed: usize,
    pub retain_failed: usize,
    pub default_fps: u32,
    pub default_duration_secs: f64,
}

impl Default for RenderWorkerSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            poll_interval_ms: 500,
            max_attempts: 3,
            initial_backoff_secs: 5,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300,
            retain_completed: 100,
            retain_failed: 50,
            default_fps: 30,
            default_duration_secs: 30.0,
        }
    }
}

impl RenderWorkerSettings {
    fn resolve(cli: &CliConfig, file: RenderConfig) -> Self {
        let d = Self::default();
        Self {
            worker_concurrency: file
                .worker_concurrency
                .or(cli.worker_concurrency)
                .unwrap_or(d.worker_concurrency),
            poll_interval_ms: file.poll_interval_ms.unwrap_or(d.poll_interval_ms),
            max_attempts: file.max_attempts.unwrap_or(d.max_attempts),
            initial_backoff_secs: file.initial_backoff_secs.unwrap_or(d.initial_backoff_secs),
            backoff_multiplier: file.backoff_multiplier.unwrap_or(d.backoff_multiplier),
            max_backoff_secs: file.max_backoff_secs.unwrap_or(d.max_backoff_secs),
            retain_completed: file.retain_completed.unwrap_or(d.retain_completed),
            retain_failed: file.retain_failed.unwrap_or(d.retain_failed),
            default_fps: file.default_fps.unwrap_or(d.default_fps),
            default_duration_secs: file
                .default_duration_secs
                .unwrap_or(d.default_duration_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    /// AI-hybrid renders fail when unset.
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: String,
    pub sd_model: String,
    pub beats_per_image: usize,
    pub max_concurrent: usize,
    pub steps: u32,
    pub guidance: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub poll_interval_ms: u64,
    pub prediction_timeout_secs: u64,
    pub default_prompt: String,
    pub default_negative_prompt: String,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            replicate_base_url: "https://api.replicate.com".to_string(),
            sd_model: DEFAULT_SD_MODEL.to_string(),
            beats_per_image: 16,
            max_concurrent: 3,
            steps: 25,
            guidance: 7.5,
            image_width: 768,
            image_height: 432,
            poll_interval_ms: 2000,
            prediction_timeout_secs: 120,
            default_prompt: DEFAULT_AI_PROMPT.to_string(),
            default_negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
        }
    }
}

impl AiSettings {
    fn resolve(cli: &CliConfig, file: AiConfig) -> Self {
        let d = Self::default();
        Self {
            replicate_api_token: file
                .replicate_api_token
                .or_else(|| cli.replicate_api_token.clone())
                .filter(|t| !t.trim().is_empty()),
            replicate_base_url: file.replicate_base_url.unwrap_or(d.replicate_base_url),
            sd_model: file.sd_model.unwrap_or(d.sd_model),
            beats_per_image: file.beats_per_image.unwrap_or(d.beats_per_image).max(1),
            max_concurrent: file.max_concurrent.unwrap_or(d.max_concurrent).max(1),
            steps: file.steps.unwrap_or(d.steps),
            guidance: file.guidance.unwrap_or(d.guidance),
            image_width: file.image_width.unwrap_or(d.image_width),
            image_height: file.image_height.unwrap_or(d.image_height),
            poll_interval_ms: file.poll_interval_ms.unwrap_or(d.poll_interval_ms),
            prediction_timeout_secs: file
                .prediction_timeout_secs
                .unwrap_or(d.prediction_timeout_secs),
            default_prompt: file.default_prompt.unwrap_or(d.default_prompt),
            default_negative_prompt: file
                .default_negative_prompt
                .unwrap_or(d.default_negative_prompt),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub client_url: String,
    pub chromium_path: PathBuf,
    pub ready_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            client_url: "http://localhost:5173".to_string(),
            chromium_path: PathBuf::from("chromium"),
            ready_timeout_ms: 5000,
            settle_delay_ms: 100,
            jpeg_quality: 90,
        }
    }
}

impl CaptureSettings {
    fn resolve(cli: &CliConfig, file: CaptureConfig) -> Self {
        let d = Self::default();
        Self {
            client_url: file
                .client_url
                .or_else(|| cli.client_url.clone())
                .unwrap_or(d.client_url),
            chromium_path: file
                .chromium_path
                .map(PathBuf::from)
                .or_else(|| cli.chromium_path.clone())
                .unwrap_or(d.chromium_path),
            ready_timeout_ms: file.ready_timeout_ms.unwrap_or(d.ready_timeout_ms),
            settle_delay_ms: file.settle_delay_ms.unwrap_or(d.settle_delay_ms),
            jpeg_quality: file.jpeg_quality.unwrap_or(d.jpeg_quality).clamp(1, 100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub ffmpeg_path: PathBuf,
    pub audio_bitrate: String,
    pub crf: u8,
    pub preset: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            audio_bitrate: "192k".to_string(),
            crf: 23,
            preset: "fast".to_string(),
        }
    }
}

impl EncoderSettings {
    fn resolve(cli: &CliConfig, file: EncoderConfig) -> Self {
        let d = Self::default();
        Self {
            ffmpeg_path: file
                .ffmpeg_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or(d.ffmpeg_path),
            audio_bitrate: file.audio_bitrate.unwrap_or(d.audio_bitrate),
            crf: file.crf.unwrap_or(d.crf),
            preset: file.preset.unwrap_or(d.preset),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub python_path: PathBuf,
    pub script_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from("python3"),
            script_path: PathBuf::from("scripts/analyze_audio.py"),
            timeout_secs: 120,
        }
    }
}

impl AnalyzerSettings {
    fn resolve(cli: &CliConfig, file: AnalyzerConfig) -> Self {
        let d = Self::default();
        Self {
            python_path: file
                .python_path
                .map(PathBuf::from)
                .or_else(|| cli.python_path.clone())
                .unwrap_or(d.python_path),
            script_path: file
                .script_path
                .map(PathBuf::from)
                .or_else(|| cli.analyzer_script.clone())
                .unwrap_or(d.script_path),
            timeout_secs: file.timeout_secs.unwrap_or(d.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleAdvisorSettings {
    /// AI endpoints answer 503 when unset.
    pub anthropic_api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for StyleAdvisorSettings {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

impl StyleAdvisorSettings {
    fn resolve(cli: &CliConfig, file: StyleAdvisorConfig) -> Self {
        let d = Self::default();
        Self {
            anthropic_api_key: file
                .anthropic_api_key
                .or_else(|| cli.anthropic_api_key.clone())
                .filter(|k| !k.trim().is_empty()),
            base_url: file.base_url.unwrap_or(d.base_url),
            model: file.model.unwrap_or(d.model),
            max_tokens: file.max_tokens.unwrap_or(d.max_tokens),
            timeout_secs: file.timeout_secs.unwrap_or(d.timeout_secs),
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

/// Resolves a relative path against the working directory at startup.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    Ok(cwd.join(path))
}

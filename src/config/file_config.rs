use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub output_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub render: Option<RenderConfig>,
    pub ai: Option<AiConfig>,
    pub capture: Option<CaptureConfig>,
    pub encoder: Option<EncoderConfig>,
    pub analyzer: Option<AnalyzerConfig>,
    pub style_advisor: Option<StyleAdvisorConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub worker_concurrency: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_secs: Option<u64>,
    pub retain_completed: Option<usize>,
    pub retain_failed: Option<usize>,
    pub default_fps: Option<u32>,
    pub default_duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: Option<String>,
    pub sd_model: Option<String>,
    pub beats_per_image: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub prediction_timeout_secs: Option<u64>,
    pub default_prompt: Option<String>,
    pub default_negative_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub client_url: Option<String>,
    pub chromium_path: Option<String>,
    pub ready_timeout_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: Option<String>,
    pub audio_bitrate: Option<String>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub python_path: Option<String>,
    pub script_path: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StyleAdvisorConfig {
    pub anthropic_api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_sections() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/data"
            port = 4000

            [render]
            worker_concurrency = 4
            backoff_multiplier = 3.0

            [ai]
            beats_per_image = 8

            [encoder]
            preset = "veryfast"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/data"));
        assert_eq!(config.port, Some(4000));
        let render = config.render.unwrap();
        assert_eq!(render.worker_concurrency, Some(4));
        assert_eq!(render.backoff_multiplier, Some(3.0));
        assert_eq!(render.max_attempts, None);
        assert_eq!(config.ai.unwrap().beats_per_image, Some(8));
        assert_eq!(config.encoder.unwrap().preset.as_deref(), Some("veryfast"));
        assert!(config.capture.is_none());
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let err = FileConfig::load(&path).unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}

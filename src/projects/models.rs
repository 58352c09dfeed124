//! Project records: the entity whose status the render worker drives.

use crate::keyframes::{Keyframe, KeyframeSettings, VisualStyle};
use crate::style_advisor::StyleSuggestion;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SD_MODEL: &str =
    "stability-ai/stable-diffusion:ac732df83cea7fff18b8472768c88ad041fa750d7579acdf40d2d39bfe9e4d05";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, distorted, low quality, watermark";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Uploaded,
    Analyzing,
    Ready,
    Rendering,
    Complete,
    Failed,
}

impl ProjectStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ProjectStatus::Uploaded => "uploaded",
            ProjectStatus::Analyzing => "analyzing",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Rendering => "rendering",
            ProjectStatus::Complete => "complete",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(ProjectStatus::Uploaded),
            "analyzing" => Some(ProjectStatus::Analyzing),
            "ready" => Some(ProjectStatus::Ready),
            "rendering" => Some(ProjectStatus::Rendering),
            "complete" => Some(ProjectStatus::Complete),
            "failed" => Some(ProjectStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
}

impl Resolution {
    /// (width, height) in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Hd720 => (1280, 720),
            Resolution::Hd1080 => (1920, 1080),
        }
    }
}

/// Which pipeline a render of this project uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectRenderMode {
    #[default]
    Procedural,
    AiHybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetadata {
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub beats: Vec<f64>,
    #[serde(default)]
    pub onsets: Vec<f64>,
    #[serde(default)]
    pub peaks: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub particle_count: u32,
    pub color_palette: Vec<String>,
    pub intensity: f64,
    pub style: VisualStyle,
    pub resolution: Resolution,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        let keyframe = KeyframeSettings::default();
        Self {
            particle_count: keyframe.particle_count,
            color_palette: keyframe.color_palette,
            intensity: keyframe.intensity,
            style: VisualStyle::default(),
            resolution: Resolution::default(),
        }
    }
}

/// Partial update of `ProjectSettings`; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettingsPatch {
    pub particle_count: Option<u32>,
    pub color_palette: Option<Vec<String>>,
    pub intensity: Option<f64>,
    pub style: Option<VisualStyle>,
    pub resolution: Option<Resolution>,
}

impl ProjectSettingsPatch {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.particle_count == Some(0) {
            return Err("particleCount must be > 0");
        }
        if self.color_palette.as_ref().is_some_and(|p| p.is_empty()) {
            return Err("colorPalette must not be empty");
        }
        if self.intensity.is_some_and(|i| !(i > 0.0)) {
            return Err("intensity must be > 0");
        }
        Ok(())
    }

    pub fn apply(&self, settings: &mut ProjectSettings) {
        if let Some(particle_count) = self.particle_count {
            settings.particle_count = particle_count;
        }
        if let Some(color_palette) = &self.color_palette {
            settings.color_palette = color_palette.clone();
        }
        if let Some(intensity) = self.intensity {
            settings.intensity = intensity;
        }
        if let Some(style) = self.style {
            settings.style = style;
        }
        if let Some(resolution) = self.resolution {
            settings.resolution = resolution;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProjectSettings {
    pub mode: ProjectRenderMode,
    pub sd_prompt: String,
    pub sd_negative_prompt: String,
    pub sd_model: String,
    #[serde(default)]
    pub style_suggestions: Vec<StyleSuggestion>,
}

impl Default for AiProjectSettings {
    fn default() -> Self {
        Self {
            mode: ProjectRenderMode::Procedural,
            sd_prompt: String::new(),
            sd_negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            sd_model: DEFAULT_SD_MODEL.to_string(),
            style_suggestions: vec![],
        }
    }
}

/// Partial update of the user-editable AI fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettingsPatch {
    pub mode: Option<ProjectRenderMode>,
    pub sd_prompt: Option<String>,
    pub sd_negative_prompt: Option<String>,
    pub sd_model: Option<String>,
}

impl AiSettingsPatch {
    pub fn apply(&self, settings: &mut AiProjectSettings) {
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(prompt) = &self.sd_prompt {
            settings.sd_prompt = prompt.clone();
        }
        if let Some(negative) = &self.sd_negative_prompt {
            settings.sd_negative_prompt = negative.clone();
        }
        if let Some(model) = &self.sd_model {
            settings.sd_model = model.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub audio_path: PathBuf,
    pub status: ProjectStatus,
    pub audio_metadata: Option<AudioMetadata>,
    pub settings: ProjectSettings,
    pub keyframes: Vec<Keyframe>,
    pub ai_settings: AiProjectSettings,
    pub output_path: Option<PathBuf>,
    /// Epoch seconds.
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub user_id: String,
    pub name: String,
    pub audio_path: PathBuf,
    pub status: ProjectStatus,
}

/// Result of asking to start a render for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginRender {
    Started,
    AlreadyRendering,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_wire_names_and_dimensions() {
        assert_eq!(
            serde_json::to_value(Resolution::Hd1080).unwrap(),
            serde_json::json!("1080p")
        );
        let parsed: Resolution = serde_json::from_str("\"720p\"").unwrap();
        assert_eq!(parsed.dimensions(), (1280, 720));
        assert_eq!(Resolution::Hd1080.dimensions(), (1920, 1080));
    }

    #[test]
    fn settings_patch_only_touches_present_fields() {
        let mut settings = ProjectSettings::default();
        let patch: ProjectSettingsPatch =
            serde_json::from_str(r#"{"intensity": 2.5, "resolution": "1080p"}"#).unwrap();

        patch.apply(&mut settings);

        assert_eq!(settings.intensity, 2.5);
        assert_eq!(settings.resolution, Resolution::Hd1080);
        assert_eq!(settings.particle_count, 2000);
        assert_eq!(settings.style, VisualStyle::Particles);
    }

    #[test]
    fn settings_patch_validation() {
        let ok = ProjectSettingsPatch {
            particle_count: Some(10),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let zero = ProjectSettingsPatch {
            particle_count: Some(0),
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let empty = ProjectSettingsPatch {
            color_palette: Some(vec![]),
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let dark = ProjectSettingsPatch {
            intensity: Some(0.0),
            ..Default::default()
        };
        assert!(dark.validate().is_err());
    }

    #[test]
    fn ai_patch_ignores_suggestions() {
        let mut ai = AiProjectSettings::default();
        let patch: AiSettingsPatch = serde_json::from_str(
            r#"{"mode": "ai-hybrid", "sdPrompt": "glowing forest", "styleSuggestions": [1]}"#,
        )
        .unwrap();

        patch.apply(&mut ai);

        assert_eq!(ai.mode, ProjectRenderMode::AiHybrid);
        assert_eq!(ai.sd_prompt, "glowing forest");
        assert_eq!(ai.sd_negative_prompt, DEFAULT_NEGATIVE_PROMPT);
        assert!(ai.style_suggestions.is_empty());
    }
}

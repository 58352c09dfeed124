//! Keyframe data types shared by the interpolation engine, the project store
//! and the HTTP layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Visual styles the rendering surface knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualStyle {
    #[default]
    Particles,
    Waveform,
    Nebula,
    Cyberpunk,
    Aurora,
    Fractal,
    Ocean,
}

impl VisualStyle {
    pub const ALL: [VisualStyle; 7] = [
        VisualStyle::Particles,
        VisualStyle::Waveform,
        VisualStyle::Nebula,
        VisualStyle::Cyberpunk,
        VisualStyle::Aurora,
        VisualStyle::Fractal,
        VisualStyle::Ocean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VisualStyle::Particles => "particles",
            VisualStyle::Waveform => "waveform",
            VisualStyle::Nebula => "nebula",
            VisualStyle::Cyberpunk => "cyberpunk",
            VisualStyle::Aurora => "aurora",
            VisualStyle::Fractal => "fractal",
            VisualStyle::Ocean => "ocean",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|style| style.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeSettings {
    pub particle_count: u32,
    pub color_palette: Vec<String>,
    pub intensity: f64,
}

impl Default for KeyframeSettings {
    fn default() -> Self {
        Self {
            particle_count: 2000,
            color_palette: vec![
                "#4F46E5".to_string(),
                "#7C3AED".to_string(),
                "#EC4899".to_string(),
            ],
            intensity: 1.0,
        }
    }
}

/// A user-placed control point: the exact visual state wanted at `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f64,
    pub style: VisualStyle,
    pub settings: KeyframeSettings,
}

impl Keyframe {
    pub fn new(time: f64, style: VisualStyle, settings: KeyframeSettings) -> Self {
        Self {
            time,
            style,
            settings,
        }
    }
}

/// Continuous visual state derived from a keyframe list at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolatedState {
    pub style: VisualStyle,
    pub next_style: Option<VisualStyle>,
    /// 0 shows `style` only, 1 shows `next_style` only.
    pub style_blend: f64,
    pub particle_count: u32,
    pub color_palette: Vec<String>,
    pub intensity: f64,
}

impl InterpolatedState {
    pub(super) fn at_keyframe(keyframe: &Keyframe) -> Self {
        Self {
            style: keyframe.style,
            next_style: None,
            style_blend: 0.0,
            particle_count: keyframe.settings.particle_count,
            color_palette: keyframe.settings.color_palette.clone(),
            intensity: keyframe.settings.intensity,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum KeyframeError {
    #[error("keyframe {index}: time must be a finite number >= 0")]
    InvalidTime { index: usize },

    #[error("keyframe {index}: particleCount must be > 0")]
    InvalidParticleCount { index: usize },

    #[error("keyframe {index}: colorPalette must not be empty")]
    EmptyPalette { index: usize },

    #[error("keyframe {index}: intensity must be > 0")]
    InvalidIntensity { index: usize },
}

/// Checks the per-keyframe invariants before a list is accepted.
pub fn validate_keyframes(keyframes: &[Keyframe]) -> Result<(), KeyframeError> {
    for (index, keyframe) in keyframes.iter().enumerate() {
        if !keyframe.time.is_finite() || keyframe.time < 0.0 {
            return Err(KeyframeError::InvalidTime { index });
        }
        if keyframe.settings.particle_count == 0 {
            return Err(KeyframeError::InvalidParticleCount { index });
        }
        if keyframe.settings.color_palette.is_empty() {
            return Err(KeyframeError::EmptyPalette { index });
        }
        if !(keyframe.settings.intensity > 0.0) {
            return Err(KeyframeError::InvalidIntensity { index });
        }
    }
    Ok(())
}

use crate::projects::{AudioMetadata, ProjectRenderMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when talking to the style advisor.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Style advisor is not configured")]
    NotConfigured,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Statistics about a track the advisor bases its suggestions on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSummary {
    pub bpm: Option<f64>,
    pub duration: Option<f64>,
    pub beat_count: usize,
    pub onset_count: usize,
    pub peak_count: usize,
}

impl AudioSummary {
    pub fn from_metadata(metadata: &AudioMetadata) -> Self {
        Self {
            bpm: metadata.bpm,
            duration: Some(metadata.duration),
            beat_count: metadata.beats.len(),
            onset_count: metadata.onsets.len(),
            peak_count: metadata.peaks.len(),
        }
    }

    /// Beats per second, when both counts are known.
    pub fn beat_density(&self) -> Option<f64> {
        match self.duration {
            Some(duration) if duration > 0.0 && self.beat_count > 0 => {
                Some(self.beat_count as f64 / duration)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSuggestion {
    pub style_id: String,
    pub score: f64,
    pub explanation: String,
    pub suggested_prompt: String,
    pub suggested_palette: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSuggestionResponse {
    pub overall_mood: String,
    pub recommended_mode: ProjectRenderMode,
    pub suggestions: Vec<StyleSuggestion>,
}

//! Audio analysis collaborator.
//!
//! Beat detection runs in an external script; this module only launches it
//! and interprets its JSON report.

mod script;

pub use script::ScriptAudioAnalyzer;

use crate::projects::{AudioMetadata, ProjectStore};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Report produced by the analysis script.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub beats: Vec<f64>,
    #[serde(default)]
    pub onsets: Vec<f64>,
    #[serde(default)]
    pub peaks: Vec<f64>,
}

impl AnalysisResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Metadata worth storing, if the analysis succeeded.
    pub fn into_metadata(self) -> Option<AudioMetadata> {
        if !self.success {
            return None;
        }
        let mut beats = self.beats;
        beats.sort_by(f64::total_cmp);
        Some(AudioMetadata {
            duration: self.duration?,
            bpm: self.bpm,
            beats,
            onsets: self.onsets,
            peaks: self.peaks,
        })
    }
}

#[async_trait]
pub trait AudioAnalyzer: Send + Sync {
    /// Never fails: problems are reported through `success = false`.
    async fn analyze(&self, audio_path: &Path) -> AnalysisResult;
}

/// Analyzes a freshly uploaded track and moves its project to `ready`.
///
/// A failed analysis still leaves the project ready, just without beats.
pub async fn analyze_project(
    analyzer: &dyn AudioAnalyzer,
    projects: &dyn ProjectStore,
    project_id: &str,
    audio_path: &Path,
) -> Result<()> {
    let result = analyzer.analyze(audio_path).await;
    let error = result.error.clone();
    let metadata = result.into_metadata();

    match &metadata {
        Some(metadata) => info!(
            project_id,
            bpm = metadata.bpm,
            beats = metadata.beats.len(),
            "Audio analysis finished"
        ),
        None => warn!(
            project_id,
            "Audio analysis failed, continuing without beats: {}",
            error.as_deref().unwrap_or("no duration reported")
        ),
    }

    projects.set_audio_metadata(project_id, metadata.as_ref())?;
    Ok(())
}

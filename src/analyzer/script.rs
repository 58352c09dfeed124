use super::{AnalysisResult, AudioAnalyzer};
use crate::config::AnalyzerSettings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs `<interpreter> <script> <audio path>` and parses its stdout.
pub struct ScriptAudioAnalyzer {
    interpreter: PathBuf,
    script_path: PathBuf,
    timeout: Duration,
}

impl ScriptAudioAnalyzer {
    pub fn new(settings: &AnalyzerSettings) -> Self {
        Self::with_command(
            settings.python_path.clone(),
            settings.script_path.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    pub fn with_command(interpreter: PathBuf, script_path: PathBuf, timeout: Duration) -> Self {
        Self {
            interpreter,
            script_path,
            timeout,
        }
    }
}

#[async_trait]
impl AudioAnalyzer for ScriptAudioAnalyzer {
    async fn analyze(&self, audio_path: &Path) -> AnalysisResult {
        let absolute = std::path::absolute(audio_path).unwrap_or_else(|_| audio_path.to_path_buf());
        debug!("Analyzing {:?} with {:?}", absolute, self.script_path);

        let child = Command::new(&self.interpreter)
            .arg(&self.script_path)
            .arg(&absolute)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return AnalysisResult::failure(format!(
                    "Failed to run analysis: {}. Make sure {:?} is installed.",
                    e, self.interpreter
                ))
            }
            Err(_) => {
                return AnalysisResult::failure(format!(
                    "Analysis timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return AnalysisResult::failure(if stderr.is_empty() {
                format!("Analysis exited with {}", output.status)
            } else {
                stderr
            });
        }

        match serde_json::from_slice(&output.stdout) {
            Ok(result) => result,
            Err(e) => AnalysisResult::failure(format!("Failed to parse analysis output: {}", e)),
        }
    }
}

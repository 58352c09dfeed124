use super::RequestsLoggingLevel;
use std::path::PathBuf;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Rendered videos and working dirs live under `<output_dir>/<project id>/`.
    pub output_dir: PathBuf,
    pub default_fps: u32,
    /// Track length assumed when a project has no analysis.
    pub default_duration_secs: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            output_dir: PathBuf::from("outputs"),
            default_fps: 30,
            default_duration_secs: 30.0,
        }
    }
}

impl ServerConfig {
    pub fn project_output_dir(&self, project_id: &str) -> PathBuf {
        self.output_dir.join(project_id)
    }

    pub fn project_frames_dir(&self, project_id: &str) -> PathBuf {
        self.project_output_dir(project_id).join("frames")
    }
}

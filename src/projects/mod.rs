//! Projects: the uploaded track, its editing state and its render status.

mod models;
mod schema;
mod store;

pub use models::{
    AiProjectSettings, AiSettingsPatch, AudioMetadata, BeginRender, NewProject, Project,
    ProjectRenderMode, ProjectSettings, ProjectSettingsPatch, ProjectStatus, Resolution,
    DEFAULT_NEGATIVE_PROMPT, DEFAULT_SD_MODEL,
};
pub use store::{ProjectStore, SqliteProjectStore};

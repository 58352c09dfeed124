//! SQLite project store.

use super::models::*;
use super::schema::PROJECTS_VERSIONED_SCHEMAS;
use crate::keyframes::Keyframe;
use crate::sqlite_persistence::{open_in_memory_db, open_versioned_db};
use crate::style_advisor::StyleSuggestion;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage for projects.
///
/// Mutators return `false` / `None` when the project does not exist.
pub trait ProjectStore: Send + Sync {
    fn create(&self, project: NewProject) -> Result<Project>;

    fn get(&self, id: &str) -> Result<Option<Project>>;

    /// Newest first.
    fn list_for_user(&self, user_id: &str) -> Result<Vec<Project>>;

    fn set_status(&self, id: &str, status: ProjectStatus) -> Result<bool>;

    /// Moves a project to `rendering` unless it is already rendering.
    ///
    /// This is the only way out of `complete` / `failed`.
    fn begin_render(&self, id: &str) -> Result<BeginRender>;

    fn mark_render_complete(&self, id: &str, output_path: &Path) -> Result<bool>;

    /// Sets `failed` and forgets any previous output.
    fn mark_render_failed(&self, id: &str) -> Result<bool>;

    fn set_keyframes(&self, id: &str, keyframes: &[Keyframe]) -> Result<bool>;

    /// Records the outcome of audio analysis and moves an `analyzing`
    /// project to `ready`. `None` means analysis failed: the project becomes
    /// ready without beat data.
    fn set_audio_metadata(&self, id: &str, metadata: Option<&AudioMetadata>) -> Result<bool>;

    fn update_settings(&self, id: &str, patch: &ProjectSettingsPatch) -> Result<Option<Project>>;

    fn update_ai_settings(
        &self,
        id: &str,
        patch: &AiSettingsPatch,
    ) -> Result<Option<AiProjectSettings>>;

    fn set_style_suggestions(&self, id: &str, suggestions: &[StyleSuggestion]) -> Result<bool>;

    fn delete(&self, id: &str) -> Result<bool>;
}

pub struct SqliteProjectStore {
    conn: Arc<Mutex<Connection>>,
}

const PROJECT_COLUMNS: &str = "id, user_id, name, audio_path, status, audio_metadata, settings, \
     keyframes, ai_settings, output_path, created_at, updated_at";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl SqliteProjectStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), PROJECTS_VERSIONED_SCHEMAS, "projects")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_db(PROJECTS_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("projects connection mutex poisoned"))
    }

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
        let status_str: String = row.get(4)?;
        let status = ProjectStatus::from_db_str(&status_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(4, format!("status={}", status_str), Type::Text)
        })?;
        let audio_metadata = match row.get::<_, Option<String>>(5)? {
            Some(_) => Some(json_column(row, 5)?),
            None => None,
        };

        Ok(Project {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            audio_path: PathBuf::from(row.get::<_, String>(3)?),
            status,
            audio_metadata,
            settings: json_column(row, 6)?,
            keyframes: json_column(row, 7)?,
            ai_settings: json_column(row, 8)?,
            output_path: row.get::<_, Option<String>>(9)?.map(PathBuf::from),
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn query_project(conn: &Connection, id: &str) -> Result<Option<Project>> {
        conn.query_row(
            &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
            params![id],
            Self::row_to_project,
        )
        .optional()
        .with_context(|| format!("Failed to load project {}", id))
    }

    /// Overwrites one JSON column. Returns whether the row existed.
    fn write_json_column<T: serde::Serialize + ?Sized>(
        conn: &Connection,
        id: &str,
        column: &str,
        value: &T,
    ) -> Result<bool> {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("Failed to encode project {}", column))?;
        let changed = conn.execute(
            &format!(
                "UPDATE projects SET {} = ?2, updated_at = ?3 WHERE id = ?1",
                column
            ),
            params![id, encoded, now()],
        )?;
        Ok(changed > 0)
    }
}

impl ProjectStore for SqliteProjectStore {
    fn create(&self, new: NewProject) -> Result<Project> {
        let timestamp = now();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            name: new.name,
            audio_path: new.audio_path,
            status: new.status,
            audio_metadata: None,
            settings: ProjectSettings::default(),
            keyframes: vec![],
            ai_settings: AiProjectSettings::default(),
            output_path: None,
            created_at: timestamp,
            updated_at: timestamp,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, user_id, name, audio_path, status, settings, keyframes, \
             ai_settings, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                project.id,
                project.user_id,
                project.name,
                project.audio_path.to_string_lossy(),
                project.status.as_db_str(),
                serde_json::to_string(&project.settings)?,
                serde_json::to_string(&project.keyframes)?,
                serde_json::to_string(&project.ai_settings)?,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(project)
    }

    fn get(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.lock()?;
        Self::query_project(&conn, id)
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<Project>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            PROJECT_COLUMNS
        ))?;
        let projects = stmt
            .query_map(params![user_id], Self::row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    fn set_status(&self, id: &str, status: ProjectStatus) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_db_str(), now()],
        )?;
        Ok(changed > 0)
    }

    fn begin_render(&self, id: &str) -> Result<BeginRender> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET status = 'rendering', updated_at = ?2 \
             WHERE id = ?1 AND status != 'rendering'",
            params![id, now()],
        )?;
        if changed > 0 {
            return Ok(BeginRender::Started);
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(if exists {
            BeginRender::AlreadyRendering
        } else {
            BeginRender::NotFound
        })
    }

    fn mark_render_complete(&self, id: &str, output_path: &Path) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET status = 'complete', output_path = ?2, updated_at = ?3 \
             WHERE id = ?1",
            params![id, output_path.to_string_lossy(), now()],
        )?;
        Ok(changed > 0)
    }

    fn mark_render_failed(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE projects SET status = 'failed', output_path = NULL, updated_at = ?2 \
             WHERE id = ?1",
            params![id, now()],
        )?;
        Ok(changed > 0)
    }

    fn set_keyframes(&self, id: &str, keyframes: &[Keyframe]) -> Result<bool> {
        let conn = self.lock()?;
        Self::write_json_column(&conn, id, "keyframes", keyframes)
    }

    fn set_audio_metadata(&self, id: &str, metadata: Option<&AudioMetadata>) -> Result<bool> {
        let conn = self.lock()?;
        if let Some(metadata) = metadata {
            if !Self::write_json_column(&conn, id, "audio_metadata", metadata)? {
                return Ok(false);
            }
        }
        let changed = conn.execute(
            "UPDATE projects SET status = 'ready', updated_at = ?2 \
             WHERE id = ?1 AND status = 'analyzing'",
            params![id, now()],
        )?;
        Ok(metadata.is_some() || changed > 0)
    }

    fn update_settings(&self, id: &str, patch: &ProjectSettingsPatch) -> Result<Option<Project>> {
        let conn = self.lock()?;
        let Some(mut project) = Self::query_project(&conn, id)? else {
            return Ok(None);
        };
        patch.apply(&mut project.settings);
        Self::write_json_column(&conn, id, "settings", &project.settings)?;
        Self::query_project(&conn, id)
    }

    fn update_ai_settings(
        &self,
        id: &str,
        patch: &AiSettingsPatch,
    ) -> Result<Option<AiProjectSettings>> {
        let conn = self.lock()?;
        let Some(mut project) = Self::query_project(&conn, id)? else {
            return Ok(None);
        };
        patch.apply(&mut project.ai_settings);
        Self::write_json_column(&conn, id, "ai_settings", &project.ai_settings)?;
        Ok(Some(project.ai_settings))
    }

    fn set_style_suggestions(&self, id: &str, suggestions: &[StyleSuggestion]) -> Result<bool> {
        let conn = self.lock()?;
        let Some(mut project) = Self::query_project(&conn, id)? else {
            return Ok(false);
        };
        project.ai_settings.style_suggestions = suggestions.to_vec();
        Self::write_json_column(&conn, id, "ai_settings", &project.ai_settings)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

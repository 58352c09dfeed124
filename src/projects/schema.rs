//! Database schema for projects.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Projects Table - Version 0
// =============================================================================

/// Nested structures (settings, keyframes, analysis) are stored as JSON text.
const PROJECTS_TABLE_V0: Table = Table {
    name: "projects",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("audio_path", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("audio_metadata", &SqlType::Text),
        sqlite_column!("settings", &SqlType::Text, non_null = true),
        sqlite_column!(
            "keyframes",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!("ai_settings", &SqlType::Text, non_null = true),
        sqlite_column!("output_path", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_projects_user", "user_id, created_at")],
};

pub const PROJECTS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[PROJECTS_TABLE_V0],
    migration: None,
}];

//! Database schema for render_queue.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Render Jobs Table - Version 0
// =============================================================================

/// One row per render job. `payload` holds the JSON-encoded `RenderJobData`.
const RENDER_JOBS_TABLE_V0: Table = Table {
    name: "render_jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("project_id", &SqlType::Text, non_null = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("stage", &SqlType::Text, non_null = true),
        sqlite_column!(
            "progress",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("message", &SqlType::Text),
        sqlite_column!(
            "attempts_made",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("max_attempts", &SqlType::Integer, non_null = true),
        sqlite_column!("failed_reason", &SqlType::Text),
        sqlite_column!("output_path", &SqlType::Text),
        sqlite_column!("run_after", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_render_jobs_claim", "state, run_after, created_at"),
        ("idx_render_jobs_project", "project_id"),
    ],
};

pub const RENDER_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[RENDER_JOBS_TABLE_V0],
    migration: None,
}];

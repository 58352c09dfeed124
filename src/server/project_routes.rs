//! Project HTTP routes.
//!
//! Provides endpoints for:
//! - Creating projects (which kicks off audio analysis)
//! - Reading, listing and deleting projects
//! - Editing render settings and the keyframe timeline

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use super::api_error::{ApiError, ApiResult};
use crate::analyzer::analyze_project;
use crate::keyframes::{
    generate_beat_keyframes, interpolate, snap_to_beat, validate_keyframes, Easing, Keyframe,
    KeyframeSettings, VisualStyle, DEFAULT_TRANSITION_SECS,
};
use crate::projects::{NewProject, ProjectSettingsPatch, ProjectStatus};
use crate::server::metrics;
use crate::server::state::ServerState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectBody {
    pub user_id: String,
    pub name: String,
    pub audio_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProjectsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KeyframesBody {
    #[serde(default)]
    pub keyframes: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatKeyframesBody {
    /// Styles cycled through beat by beat; the project's style when empty.
    #[serde(default)]
    pub styles: Vec<VisualStyle>,
    /// Keep every n-th beat only.
    pub every: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateQuery {
    pub time: f64,
    pub easing: Option<Easing>,
    pub transition: Option<f64>,
    /// Snap `time` to the nearest beat within this many seconds.
    pub snap_threshold: Option<f64>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_project(
    State(state): State<ServerState>,
    Json(body): Json<CreateProjectBody>,
) -> ApiResult<impl IntoResponse> {
    if body.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    if body.audio_path.as_os_str().is_empty() {
        return Err(ApiError::bad_request("audioPath is required"));
    }

    let project = state.projects.create(NewProject {
        user_id: body.user_id,
        name: body.name,
        audio_path: body.audio_path,
        status: ProjectStatus::Analyzing,
    })?;
    info!(project_id = %project.id, "Project created, analyzing audio");

    let analyzer = state.analyzer.clone();
    let projects = state.projects.clone();
    let project_id = project.id.clone();
    let audio_path = project.audio_path.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        if let Err(e) =
            analyze_project(analyzer.as_ref(), projects.as_ref(), &project_id, &audio_path).await
        {
            warn!(project_id = %project_id, "Failed to store analysis: {:#}", e);
        }
        metrics::record_analysis(started.elapsed());
    });

    Ok((StatusCode::CREATED, Json(json!({ "project": project }))))
}

async fn list_projects(
    State(state): State<ServerState>,
    Query(query): Query<ListProjectsQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id = query
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("userId is required"))?;
    let projects = state.projects.list_for_user(&user_id)?;
    Ok(Json(json!({ "projects": projects })))
}

async fn get_project(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .projects
        .get(&id)?
        .ok_or_else(ApiError::project_not_found)?;
    Ok(Json(json!({ "project": project })))
}

async fn delete_project(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.projects.delete(&id)? {
        return Err(ApiError::project_not_found());
    }
    let dir = state.config.project_output_dir(&id);
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(project_id = %id, "Failed to remove output dir {:?}: {}", dir, e);
        }
    }
    info!(project_id = %id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn update_settings(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(patch): Json<ProjectSettingsPatch>,
) -> ApiResult<impl IntoResponse> {
    patch.validate().map_err(ApiError::bad_request)?;
    let project = state
        .projects
        .update_settings(&id, &patch)?
        .ok_or_else(ApiError::project_not_found)?;
    Ok(Json(json!({ "project": project })))
}

async fn put_keyframes(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<KeyframesBody>,
) -> ApiResult<impl IntoResponse> {
    if !body.keyframes.is_array() {
        return Err(ApiError::bad_request("keyframes must be an array"));
    }
    let keyframes: Vec<Keyframe> = serde_json::from_value(body.keyframes)
        .map_err(|e| ApiError::bad_request(format!("Invalid keyframe: {}", e)))?;
    validate_keyframes(&keyframes).map_err(|e| ApiError::bad_request(e.to_string()))?;

    if !state.projects.set_keyframes(&id, &keyframes)? {
        return Err(ApiError::project_not_found());
    }
    Ok(Json(json!({ "keyframes": keyframes })))
}

/// Replaces the timeline with one keyframe per analyzed beat.
async fn keyframes_from_beats(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let body: BeatKeyframesBody = if body.is_empty() {
        BeatKeyframesBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid body: {}", e)))?
    };
    let project = state
        .projects
        .get(&id)?
        .ok_or_else(ApiError::project_not_found)?;
    let metadata = project
        .audio_metadata
        .ok_or_else(|| ApiError::bad_request("Audio analysis not complete"))?;

    let every = body.every.unwrap_or(1).max(1);
    let beats: Vec<f64> = metadata.beats.iter().copied().step_by(every).collect();
    let styles = if body.styles.is_empty() {
        vec![project.settings.style]
    } else {
        body.styles
    };
    let base = KeyframeSettings {
        particle_count: project.settings.particle_count,
        color_palette: project.settings.color_palette.clone(),
        intensity: project.settings.intensity,
    };

    let keyframes = generate_beat_keyframes(&beats, &styles, &base);
    state.projects.set_keyframes(&id, &keyframes)?;
    Ok(Json(json!({ "keyframes": keyframes })))
}

/// The interpolated visual state the render surface shows at `time`.
async fn get_visual_state(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<StateQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .projects
        .get(&id)?
        .ok_or_else(ApiError::project_not_found)?;

    let time = match (query.snap_threshold, &project.audio_metadata) {
        (Some(threshold), Some(metadata)) => snap_to_beat(query.time, &metadata.beats, threshold),
        _ => query.time,
    };
    let visual = interpolate(
        &project.keyframes,
        time,
        query.easing.unwrap_or_default(),
        query.transition.unwrap_or(DEFAULT_TRANSITION_SECS),
    );

    // Without keyframes the project settings apply unchanged.
    let visual = match visual {
        Some(v) => serde_json::to_value(v).map_err(anyhow::Error::from)?,
        None => json!({
            "style": project.settings.style,
            "nextStyle": null,
            "styleBlend": 0.0,
            "particleCount": project.settings.particle_count,
            "colorPalette": project.settings.color_palette,
            "intensity": project.settings.intensity,
        }),
    };
    Ok(Json(json!({ "time": time, "state": visual })))
}

pub fn make_project_routes(state: ServerState) -> Router {
    Router::new()
        .route("/", post(create_project).get(list_projects))
        .route("/{id}", get(get_project).delete(delete_project))
        .route("/{id}/settings", patch(update_settings))
        .route("/{id}/keyframes", put(put_keyframes))
        .route("/{id}/keyframes/from-beats", post(keyframes_from_beats))
        .route("/{id}/state", get(get_visual_state))
        .with_state(state)
}

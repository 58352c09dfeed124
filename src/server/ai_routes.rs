//! AI assistance routes: style suggestions, prompt refinement and the
//! per-project AI render settings.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::api_error::{ApiError, ApiResult};
use crate::projects::{AiSettingsPatch, Project};
use crate::server::state::ServerState;
use crate::style_advisor::{AdvisorError, AudioSummary, StyleAdvisor};

#[derive(Debug, Default, Deserialize)]
pub struct SuggestQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefinePromptBody {
    pub prompt: Option<String>,
}

impl From<AdvisorError> for ApiError {
    fn from(err: AdvisorError) -> Self {
        match err {
            AdvisorError::NotConfigured => ApiError::unavailable(err.to_string()),
            AdvisorError::Timeout => ApiError::new(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
            other => {
                warn!("Style advisor failed: {}", other);
                ApiError::new(StatusCode::BAD_GATEWAY, other.to_string())
            }
        }
    }
}

fn advisor(state: &ServerState) -> ApiResult<Arc<dyn StyleAdvisor>> {
    state
        .style_advisor
        .clone()
        .ok_or_else(|| ApiError::from(AdvisorError::NotConfigured))
}

fn load_project(state: &ServerState, id: &str) -> ApiResult<Project> {
    state
        .projects
        .get(id)?
        .ok_or_else(ApiError::project_not_found)
}

fn audio_summary(project: &Project) -> ApiResult<AudioSummary> {
    project
        .audio_metadata
        .as_ref()
        .map(AudioSummary::from_metadata)
        .ok_or_else(|| ApiError::bad_request("Audio analysis not complete"))
}

async fn suggest_styles(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
    Query(query): Query<SuggestQuery>,
) -> ApiResult<impl IntoResponse> {
    let advisor = advisor(&state)?;
    let project = load_project(&state, &project_id)?;
    let summary = audio_summary(&project)?;

    let cached = &project.ai_settings.style_suggestions;
    if !cached.is_empty() && !query.refresh {
        return Ok(Json(json!({
            "suggestions": cached,
            "overallMood": "",
            "recommendedMode": project.ai_settings.mode,
        })));
    }

    let response = advisor.suggest_styles(&summary).await?;
    state
        .projects
        .set_style_suggestions(&project_id, &response.suggestions)?;
    info!(
        project_id = %project_id,
        count = response.suggestions.len(),
        "Stored style suggestions"
    );
    Ok(Json(json!({
        "suggestions": response.suggestions,
        "overallMood": response.overall_mood,
        "recommendedMode": response.recommended_mode,
    })))
}

async fn get_suggestions(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = load_project(&state, &project_id)?;
    Ok(Json(
        json!({ "suggestions": project.ai_settings.style_suggestions }),
    ))
}

async fn refine_prompt(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
    Json(body): Json<RefinePromptBody>,
) -> ApiResult<impl IntoResponse> {
    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("prompt is required"))?;
    let advisor = advisor(&state)?;
    let project = load_project(&state, &project_id)?;
    let summary = audio_summary(&project)?;

    let refined = advisor.refine_prompt(&prompt, &summary).await?;
    Ok(Json(json!({ "refinedPrompt": refined })))
}

async fn get_ai_settings(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = load_project(&state, &project_id)?;
    Ok(Json(json!({ "aiSettings": project.ai_settings })))
}

async fn update_ai_settings(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
    Json(patch): Json<AiSettingsPatch>,
) -> ApiResult<impl IntoResponse> {
    let settings = state
        .projects
        .update_ai_settings(&project_id, &patch)?
        .ok_or_else(ApiError::project_not_found)?;
    Ok(Json(json!({ "aiSettings": settings })))
}

pub fn make_ai_routes(state: ServerState) -> Router {
    Router::new()
        .route("/{project_id}/suggest-styles", post(suggest_styles))
        .route("/{project_id}/suggestions", get(get_suggestions))
        .route("/{project_id}/refine-prompt", post(refine_prompt))
        .route(
            "/{project_id}/settings",
            get(get_ai_settings).post(update_ai_settings),
        )
        .with_state(state)
}

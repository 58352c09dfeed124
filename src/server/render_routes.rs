//! Render HTTP routes: starting renders, polling or streaming their status,
//! and receiving frames captured client-side.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

use super::api_error::{ApiError, ApiResult};
use crate::pipeline::capture::frame_file_name;
use crate::projects::{BeginRender, Project, ProjectRenderMode, ProjectStatus};
use crate::render_queue::{
    AiHybridSettings, JobStatusView, RenderJobData, RenderMode, RenderSettings,
};
use crate::server::state::ServerState;

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_FRAMES_BODY_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FrameUpload {
    pub index: usize,
    /// Base64 JPEG or PNG, optionally as a `data:` URL.
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct FramesBody {
    pub frames: Vec<FrameUpload>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRenderState {
    pub status: ProjectStatus,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderStatusResponse {
    pub project: ProjectRenderState,
    pub job: Option<JobStatusView>,
}

impl RenderStatusResponse {
    /// Nothing further will change for this render.
    fn is_settled(&self) -> bool {
        match &self.job {
            Some(job) => job.state.is_terminal(),
            None => self.project.status != ProjectStatus::Rendering,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn job_data_for(state: &ServerState, project: &Project) -> RenderJobData {
    let (width, height) = project.settings.resolution.dimensions();
    let metadata = project.audio_metadata.as_ref();
    let mode = match project.ai_settings.mode {
        ProjectRenderMode::Procedural => RenderMode::Procedural {
            duration: metadata.map(|m| m.duration),
        },
        ProjectRenderMode::AiHybrid => {
            let ai = &project.ai_settings;
            RenderMode::AiHybrid(AiHybridSettings {
                sd_prompt: ai.sd_prompt.clone(),
                sd_negative_prompt: Some(ai.sd_negative_prompt.clone())
                    .filter(|p| !p.trim().is_empty()),
                sd_model: Some(ai.sd_model.clone()).filter(|m| !m.trim().is_empty()),
                beat_timestamps: metadata.map(|m| m.beats.clone()).unwrap_or_default(),
                duration: metadata
                    .map(|m| m.duration)
                    .unwrap_or(state.config.default_duration_secs),
            })
        }
    };

    RenderJobData {
        project_id: project.id.clone(),
        user_id: project.user_id.clone(),
        audio_path: project.audio_path.clone(),
        output_path: state.config.project_output_dir(&project.id).join("video.mp4"),
        settings: RenderSettings {
            fps: state.config.default_fps,
            width,
            height,
            mode,
        },
    }
}

/// Status of `job_id`, or of the project's most recent job when absent.
fn render_status(
    state: &ServerState,
    project_id: &str,
    job_id: Option<&str>,
) -> ApiResult<RenderStatusResponse> {
    let project = state
        .projects
        .get(project_id)?
        .ok_or_else(ApiError::project_not_found)?;

    let job = match job_id {
        Some(job_id) => state
            .render_queue
            .get_job(job_id)?
            .filter(|job| job.data.project_id == project_id),
        None => state
            .render_queue
            .list_for_project(project_id)?
            .into_iter()
            .next(),
    };

    Ok(RenderStatusResponse {
        project: ProjectRenderState {
            status: project.status,
            output_path: project.output_path,
        },
        job: job.map(|j| j.status_view()),
    })
}

/// Strips an optional `data:<mime>;base64,` prefix.
fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some((_, payload)) = data.split_once(',') {
            return payload;
        }
    }
    data
}

fn decode_frame(frame: &FrameUpload) -> ApiResult<Vec<u8>> {
    let bytes = BASE64
        .decode(strip_data_url(&frame.data).trim())
        .map_err(|e| ApiError::bad_request(format!("Frame {}: invalid base64: {}", frame.index, e)))?;
    match infer::get(&bytes).map(|kind| kind.mime_type()) {
        Some("image/jpeg") | Some("image/png") => Ok(bytes),
        other => Err(ApiError::bad_request(format!(
            "Frame {}: unsupported content type {}",
            frame.index,
            other.unwrap_or("unknown")
        ))),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn start_render(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    match state.projects.begin_render(&project_id)? {
        BeginRender::NotFound => return Err(ApiError::project_not_found()),
        BeginRender::AlreadyRendering => {
            return Err(ApiError::bad_request("Project is already rendering"))
        }
        BeginRender::Started => {}
    }

    let project = match state.projects.get(&project_id)? {
        Some(project) => project,
        None => return Err(ApiError::project_not_found()),
    };
    let data = job_data_for(&state, &project);
    let mode = data.settings.mode.name();

    let handle = match state.render_queue.enqueue(data) {
        Ok(handle) => handle,
        Err(e) => {
            error!(project_id = %project_id, "Failed to enqueue render: {:#}", e);
            if let Err(e) = state.projects.mark_render_failed(&project_id) {
                error!(project_id = %project_id, "Failed to reset project status: {:#}", e);
            }
            return Err(ApiError::from(e));
        }
    };

    info!(project_id = %project_id, job_id = %handle.id, mode, "Render queued");
    Ok(Json(json!({
        "jobId": handle.id,
        "message": "Render started",
    })))
}

async fn get_render_status(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = render_status(&state, &project_id, query.job_id.as_deref())?;
    Ok(Json(status))
}

struct StreamCursor {
    state: ServerState,
    project_id: String,
    job_id: Option<String>,
    first: bool,
}

/// One snapshot per second until the render settles, then the stream ends.
async fn stream_render_status(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Unknown projects fail as a plain 404 before the stream opens.
    render_status(&state, &project_id, query.job_id.as_deref())?;

    let cursor = StreamCursor {
        state,
        project_id,
        job_id: query.job_id,
        first: true,
    };
    let events = stream::unfold(Some(cursor), |cursor| async move {
        let mut cursor = cursor?;
        if !cursor.first {
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
        cursor.first = false;

        let (event, settled) =
            match render_status(&cursor.state, &cursor.project_id, cursor.job_id.as_deref()) {
                Ok(status) => {
                    let json =
                        serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
                    (Event::default().data(json), status.is_settled())
                }
                Err(e) => (
                    Event::default()
                        .event("error")
                        .data(json!({ "error": e.message }).to_string()),
                    true,
                ),
            };
        if settled {
            debug!(project_id = %cursor.project_id, "Status stream finished");
        }
        let next = if settled { None } else { Some(cursor) };
        Some((Ok::<_, Infallible>(event), next))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn upload_frames(
    State(state): State<ServerState>,
    Path(project_id): Path<String>,
    Json(body): Json<FramesBody>,
) -> ApiResult<impl IntoResponse> {
    if state.projects.get(&project_id)?.is_none() {
        return Err(ApiError::project_not_found());
    }

    let decoded = body
        .frames
        .iter()
        .map(|frame| decode_frame(frame).map(|bytes| (frame.index, bytes)))
        .collect::<ApiResult<Vec<_>>>()?;

    let frames_dir = state.config.project_frames_dir(&project_id);
    tokio::fs::create_dir_all(&frames_dir)
        .await
        .map_err(anyhow::Error::from)?;
    for (index, bytes) in &decoded {
        tokio::fs::write(frames_dir.join(frame_file_name(*index)), bytes)
            .await
            .map_err(anyhow::Error::from)?;
    }

    debug!(project_id = %project_id, saved = decoded.len(), "Frames stored");
    Ok(Json(json!({ "saved": decoded.len() })))
}

pub fn make_render_routes(state: ServerState) -> Router {
    Router::new()
        .route("/{project_id}/start", post(start_render))
        .route("/{project_id}/status", get(get_render_status))
        .route("/{project_id}/status/stream", get(stream_render_status))
        .route(
            "/{project_id}/frames",
            post(upload_frames).layer(DefaultBodyLimit::max(MAX_FRAMES_BODY_BYTES)),
        )
        .with_state(state)
}

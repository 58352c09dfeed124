use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{error, info};

use super::ai_routes::make_ai_routes;
use super::metrics::metrics_handler;
use super::project_routes::make_project_routes;
use super::render_routes::make_render_routes;
use super::{log_requests, state::*, ServerConfig};
use crate::pipeline::WorkerHandle;
use crate::render_queue::QueueCounts;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub version: &'static str,
    pub queue: QueueCounts,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let queue = state.render_queue.counts().unwrap_or_else(|e| {
        error!("Failed to count render jobs: {}", e);
        QueueCounts::default()
    });
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        version: env!("CARGO_PKG_VERSION"),
        queue,
    };
    Json(stats)
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        projects: GuardedProjectStore,
        render_queue: GuardedRenderQueue,
        analyzer: GuardedAnalyzer,
        style_advisor: OptionalStyleAdvisor,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            projects,
            render_queue,
            analyzer,
            style_advisor,
            hash: option_env!("GIT_HASH").unwrap_or("unknown").to_owned(),
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let outputs = ServeDir::new(&state.config.output_dir);

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/projects", make_project_routes(state.clone()))
        .nest("/v1/render", make_render_routes(state.clone()))
        .nest("/v1/ai", make_ai_routes(state.clone()))
        .nest_service("/outputs", outputs)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the API and the metrics endpoint until ctrl-c, then stops the
/// render workers once in-flight requests have drained.
pub async fn run_server(
    state: ServerState,
    metrics_port: u16,
    worker: Option<WorkerHandle>,
) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind API port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        signal_token.cancel();
    });

    let metrics_token = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(metrics_token.cancelled_owned())
            .await
    });

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    shutdown.cancel();

    match metrics_server.await {
        Ok(Err(e)) => error!("Metrics server failed: {}", e),
        Err(e) => error!("Metrics server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(worker) = worker {
        worker.stop().await;
    }

    result.context("API server failed")
}

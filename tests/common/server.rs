//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases, output directory
//! and render workers backed by the fakes.

use super::constants::*;
use super::fakes::{
    FakeAnalyzer, FakeEncoder, FakeImageGenerator, FakeStyleAdvisor, FakeSurface,
};
use audioviz_render_server::config::{AiSettings, RenderWorkerSettings};
use audioviz_render_server::pipeline::{
    start_worker, ImageGenerator, RenderWorker, WorkerConfig, WorkerHandle,
};
use audioviz_render_server::projects::{ProjectStore, SqliteProjectStore};
use audioviz_render_server::render_queue::{RenderQueue, SqliteRenderQueueStore};
use audioviz_render_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use audioviz_render_server::style_advisor::StyleAdvisor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Knobs for the collaborators behind a test server.
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    /// The fake browser refuses to start, forcing the black-video fallback.
    pub surface_fails: bool,
    /// Image generation fails for the section with this seed.
    pub failing_image_seed: Option<u64>,
    /// Whether AI image generation is configured at all.
    pub image_generation: bool,
    pub style_advisor: bool,
    pub max_attempts: u32,
    /// Seconds before the first retry of a failed attempt.
    pub retry_backoff_secs: u64,
    /// Encodes that fail before the encoder starts working.
    pub encoder_failures: usize,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            surface_fails: false,
            failing_image_seed: None,
            image_generation: true,
            style_advisor: true,
            max_attempts: 1,
            retry_backoff_secs: 0,
            encoder_failures: 0,
        }
    }
}

/// Test server instance with isolated databases and output directory
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Rendered videos land in `<output_dir>/<project id>/video.mp4`
    pub output_dir: PathBuf,

    /// Project store for direct database access in tests
    pub projects: Arc<dyn ProjectStore>,

    /// Every encode the workers requested
    pub encoder: Arc<FakeEncoder>,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _worker: Option<WorkerHandle>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates temporary databases and an output directory
    /// 2. Starts render workers wired to the fakes
    /// 3. Binds to a random port (127.0.0.1:0)
    /// 4. Spawns the server in a background task
    /// 5. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of these steps fails.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let output_dir = temp_dir.path().join("outputs");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        let render_settings = RenderWorkerSettings {
            worker_concurrency: 2,
            poll_interval_ms: 10,
            max_attempts: options.max_attempts,
            initial_backoff_secs: options.retry_backoff_secs,
            default_fps: TEST_FPS,
            ..Default::default()
        };
        let ai_settings = AiSettings {
            beats_per_image: TEST_BEATS_PER_IMAGE,
            ..Default::default()
        };

        let queue_store = Arc::new(
            SqliteRenderQueueStore::new(temp_dir.path().join("render_queue.db"))
                .expect("Failed to open render queue store"),
        );
        let render_queue = Arc::new(RenderQueue::new(queue_store, &render_settings));
        let projects: Arc<dyn ProjectStore> = Arc::new(
            SqliteProjectStore::new(temp_dir.path().join("projects.db"))
                .expect("Failed to open project store"),
        );

        let encoder = Arc::new(FakeEncoder::failing(options.encoder_failures));
        let image_generator: Option<Arc<dyn ImageGenerator>> = if options.image_generation {
            Some(Arc::new(FakeImageGenerator {
                failing_seed: options.failing_image_seed,
            }))
        } else {
            None
        };
        let worker = Arc::new(RenderWorker::new(
            projects.clone(),
            Arc::new(FakeSurface {
                fail_launch: options.surface_fails,
            }),
            encoder.clone(),
            image_generator,
            ai_settings,
            render_settings.default_duration_secs,
        ));
        let worker_handle = start_worker(
            WorkerConfig::from(&render_settings),
            render_queue.clone(),
            worker,
        );

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            output_dir: output_dir.clone(),
            default_fps: TEST_FPS,
            default_duration_secs: render_settings.default_duration_secs,
        };
        let style_advisor: Option<Arc<dyn StyleAdvisor>> = if options.style_advisor {
            Some(Arc::new(FakeStyleAdvisor))
        } else {
            None
        };
        let state = ServerState::new(
            config,
            projects.clone(),
            render_queue,
            Arc::new(FakeAnalyzer),
            style_advisor,
        );
        let app = make_app(state);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        // Wait for server to be ready
        let server = Self {
            base_url,
            port,
            output_dir,
            projects,
            encoder,
            _temp_dir: temp_dir,
            _worker: Some(worker_handle),
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the stats endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Signal graceful shutdown
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Dropping the handle leaves the worker loops running; the runtime
        // ending with the test stops them.
        self._worker.take();
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use audioviz_render_server::analyzer::ScriptAudioAnalyzer;
use audioviz_render_server::config;
use audioviz_render_server::pipeline::{
    start_worker, ChromiumSurface, FfmpegEncoder, ImageGenerator, ReplicateClient, RenderWorker,
    WorkerConfig,
};
use audioviz_render_server::projects::SqliteProjectStore;
use audioviz_render_server::render_queue::{RenderQueue, SqliteRenderQueueStore};
use audioviz_render_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use audioviz_render_server::style_advisor::{ClaudeStyleAdvisor, StyleAdvisor};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the database files (render_queue.db, projects.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Where rendered videos are written. Defaults to `<db_dir>/outputs`.
    #[clap(long, value_parser = parse_path)]
    pub output_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Number of render jobs processed in parallel.
    #[clap(long)]
    pub worker_concurrency: Option<usize>,

    /// Base URL of the visualizer client loaded by the capture browser.
    #[clap(long)]
    pub client_url: Option<String>,

    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    #[clap(long)]
    pub chromium_path: Option<PathBuf>,

    #[clap(long)]
    pub python_path: Option<PathBuf>,

    /// Beat detection script run for every uploaded track.
    #[clap(long, value_parser = parse_path)]
    pub analyzer_script: Option<PathBuf>,

    /// Replicate API token, enables AI-hybrid rendering.
    #[clap(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    pub replicate_api_token: Option<String>,

    /// Anthropic API key, enables style suggestions.
    #[clap(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            output_dir: args.output_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            worker_concurrency: args.worker_concurrency,
            client_url: args.client_url.clone(),
            ffmpeg_path: args.ffmpeg_path.clone(),
            chromium_path: args.chromium_path.clone(),
            python_path: args.python_path.clone(),
            analyzer_script: args.analyzer_script.clone(),
            replicate_api_token: args.replicate_api_token.clone(),
            anthropic_api_key: args.anthropic_api_key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  output_dir: {:?}", app_config.output_dir);
    info!("  port: {}", app_config.port);
    info!("  workers: {}", app_config.render.worker_concurrency);

    std::fs::create_dir_all(&app_config.output_dir)
        .with_context(|| format!("Failed to create output dir {:?}", app_config.output_dir))?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!(
        "Opening render queue database at {:?}",
        app_config.render_queue_db_path()
    );
    let queue_store = Arc::new(SqliteRenderQueueStore::new(
        app_config.render_queue_db_path(),
    )?);
    let render_queue = Arc::new(RenderQueue::new(queue_store, &app_config.render));

    info!(
        "Opening projects database at {:?}",
        app_config.projects_db_path()
    );
    let projects = Arc::new(SqliteProjectStore::new(app_config.projects_db_path())?);

    let image_generator: Option<Arc<dyn ImageGenerator>> =
        match app_config.ai.replicate_api_token.as_deref() {
            Some(token) => {
                info!("Replicate configured, AI-hybrid rendering enabled");
                Some(Arc::new(ReplicateClient::new(token, &app_config.ai)))
            }
            None => {
                warn!("No Replicate API token, AI-hybrid renders will fail");
                None
            }
        };

    let style_advisor: Option<Arc<dyn StyleAdvisor>> =
        match app_config.style_advisor.anthropic_api_key.as_deref() {
            Some(key) => Some(Arc::new(ClaudeStyleAdvisor::new(
                key,
                &app_config.style_advisor,
            ))),
            None => {
                warn!("No Anthropic API key, style suggestions disabled");
                None
            }
        };

    let worker = Arc::new(RenderWorker::new(
        projects.clone(),
        Arc::new(ChromiumSurface::new(
            &app_config.capture,
            app_config.encoder.ffmpeg_path.clone(),
        )),
        Arc::new(FfmpegEncoder::new(&app_config.encoder)),
        image_generator,
        app_config.ai.clone(),
        app_config.render.default_duration_secs,
    ));
    let worker_handle = start_worker(
        WorkerConfig::from(&app_config.render),
        render_queue.clone(),
        worker,
    );

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        output_dir: app_config.output_dir.clone(),
        default_fps: app_config.render.default_fps,
        default_duration_secs: app_config.render.default_duration_secs,
    };
    let state = ServerState::new(
        server_config,
        projects,
        render_queue,
        Arc::new(ScriptAudioAnalyzer::new(&app_config.analyzer)),
        style_advisor,
    );

    run_server(state, app_config.metrics_port, Some(worker_handle)).await
}

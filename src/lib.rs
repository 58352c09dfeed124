//! Audio Visualizer Render Server Library
//!
//! Render orchestration for beat-synced visualizer videos: a durable job
//! queue, the capture/generate/encode pipeline, keyframe interpolation and
//! the HTTP surface driving them.

pub mod analyzer;
pub mod config;
pub mod keyframes;
pub mod pipeline;
pub mod projects;
pub mod render_queue;
pub mod server;
pub mod sqlite_persistence;
pub mod style_advisor;

// Re-export commonly used types for convenience
pub use pipeline::{start_worker, RenderWorker, WorkerConfig, WorkerHandle};
pub use projects::{ProjectStore, SqliteProjectStore};
pub use render_queue::{RenderQueue, SqliteRenderQueueStore};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig, ServerState};

//! Render pipeline: section planning, frame capture, image generation,
//! compositing and the worker that ties them together.

mod bounded;
pub mod capture;
pub mod compositor;
pub mod image_gen;
mod sections;
mod service;
mod worker;

pub use bounded::run_bounded;
pub use capture::{
    capture_frames, CaptureOutcome, CaptureRequest, CaptureTarget, ChromiumSurface,
    RenderSurface, SurfaceSession,
};
pub use compositor::{EncodeInput, EncodeRequest, FfmpegEncoder, SectionImage, VideoEncoder};
pub use image_gen::{ImageGenError, ImageGenerator, ImageRequest, ReplicateClient};
pub use sections::{build_sections, section_durations};
pub use service::{start_worker, WorkerConfig, WorkerHandle};
pub use worker::{ProgressSink, RenderError, RenderWorker};

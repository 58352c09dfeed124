use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all render server metrics
const PREFIX: &str = "audioviz";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Render Metrics
    pub static ref RENDER_JOBS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_render_jobs_total"), "Render job attempts by outcome"),
        &["outcome", "mode"]
    ).expect("Failed to create render_jobs_total metric");

    pub static ref RENDER_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_render_job_duration_seconds"),
            "Duration of one render attempt in seconds"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["mode"]
    ).expect("Failed to create render_job_duration_seconds metric");

    pub static ref RENDER_JOBS_IN_FLIGHT: Gauge = Gauge::new(
        format!("{PREFIX}_render_jobs_in_flight"),
        "Render jobs currently being processed"
    ).expect("Failed to create render_jobs_in_flight metric");

    pub static ref AI_IMAGES_GENERATED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_ai_images_generated_total"),
        "Images generated for AI-hybrid renders"
    ).expect("Failed to create ai_images_generated_total metric");

    pub static ref FRAMES_CAPTURED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_frames_captured_total"),
        "Frames captured from the render surface"
    ).expect("Failed to create frames_captured_total metric");

    pub static ref BLACK_FALLBACK_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_black_fallback_total"),
        "Procedural renders encoded as a black video"
    ).expect("Failed to create black_fallback_total metric");

    // Collaborator Metrics
    pub static ref ANALYSIS_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_analysis_duration_seconds"),
            "Audio analysis duration in seconds"
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0])
    ).expect("Failed to create analysis_duration_seconds metric");

    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(RENDER_JOBS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RENDER_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(RENDER_JOBS_IN_FLIGHT.clone()));
    let _ = REGISTRY.register(Box::new(AI_IMAGES_GENERATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FRAMES_CAPTURED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BLACK_FALLBACK_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSIS_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapses id segments so per-project URLs share one label value.
pub fn normalize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        if matches!(previous, "projects" | "render" | "ai") && !segment.is_empty() {
            out.push(":id");
        } else {
            out.push(segment);
        }
        previous = segment;
    }
    let joined = out.join("/");
    if joined.starts_with("/outputs/") {
        "/outputs/*".to_string()
    } else {
        joined
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let path = normalize_path(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, &path])
        .observe(duration.as_secs_f64());
}

/// Record the end of one render attempt: `completed`, `retried` or `failed`.
pub fn record_render_job(outcome: &str, mode: &str, duration: Duration) {
    RENDER_JOBS_TOTAL.with_label_values(&[outcome, mode]).inc();
    RENDER_JOB_DURATION_SECONDS
        .with_label_values(&[mode])
        .observe(duration.as_secs_f64());
}

pub fn set_render_jobs_in_flight_delta(delta: f64) {
    RENDER_JOBS_IN_FLIGHT.add(delta);
}

pub fn record_images_generated(count: usize) {
    AI_IMAGES_GENERATED_TOTAL.inc_by(count as u64);
}

pub fn record_frames_captured(count: usize) {
    FRAMES_CAPTURED_TOTAL.inc_by(count as u64);
}

pub fn record_black_fallback() {
    BLACK_FALLBACK_TOTAL.inc();
}

pub fn record_analysis(duration: Duration) {
    ANALYSIS_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all Songforge metrics
const PREFIX: &str = "songforge";

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

    // Generation Metrics
    pub static ref GENERATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_generations_total"), "Song generations by outcome"),
        &["outcome"]
    ).expect("Failed to create generations_total metric");

    pub static ref GENERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_generation_duration_seconds"),
            "End to end generation duration in seconds"
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]),
        &["outcome"]
    ).expect("Failed to create generation_duration_seconds metric");

    pub static ref TASK_POLLS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_polls_total"), "Task status queries by reported status"),
        &["status"]
    ).expect("Failed to create task_polls_total metric");

    pub static ref ACTIVE_JOBS: Gauge = Gauge::new(
        format!("{PREFIX}_active_jobs"),
        "Number of background generation jobs still running"
    ).expect("Failed to create active_jobs metric");

    // Cache Metrics
    pub static ref CACHE_DOWNLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_downloads_total"), "Audio downloads into the cache"),
        &["result"]
    ).expect("Failed to create cache_downloads_total metric");

    pub static ref CACHE_DOWNLOADED_BYTES_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_cache_downloaded_bytes_total"),
        "Bytes written into the cache"
    ).expect("Failed to create cache_downloaded_bytes_total metric");

    pub static ref ASSET_RESPONSES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_asset_responses_total"), "Cached asset responses by kind"),
        &["kind"]
    ).expect("Failed to create asset_responses_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(GENERATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GENERATION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TASK_POLLS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_JOBS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_DOWNLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_DOWNLOADED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ASSET_RESPONSES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a finished generation. `outcome` is "success" or the failed stage.
pub fn record_generation(outcome: &str, duration: Duration) {
    GENERATIONS_TOTAL.with_label_values(&[outcome]).inc();

    GENERATION_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn record_task_poll(status: &str) {
    TASK_POLLS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_job_started() {
    ACTIVE_JOBS.inc();
}

pub fn record_job_finished() {
    ACTIVE_JOBS.dec();
}

/// Record a cache download, `bytes` is only counted for successful ones
pub fn record_cache_download(result: &str, bytes: u64) {
    CACHE_DOWNLOADS_TOTAL.with_label_values(&[result]).inc();
    CACHE_DOWNLOADED_BYTES_TOTAL.inc_by(bytes);
}

/// Record a response of the asset route: full, partial, not_found or unsatisfiable
pub fn record_asset_response(kind: &str) {
    ASSET_RESPONSES_TOTAL.with_label_values(&[kind]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
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

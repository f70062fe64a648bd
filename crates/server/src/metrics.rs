//! Prometheus metrics for the HTTP boundary.
//!
//! Request metrics are recorded by [`crate::api::middleware::metrics_middleware`].
//! Job gauges are refreshed from the registry on every scrape, and the core
//! counters (submissions, strategy attempts, sweeps) are registered alongside.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

use mediagrab_core::JobStatus;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediagrab_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediagrab_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediagrab_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics (collected dynamically)
// =============================================================================

/// Job records by status.
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mediagrab_jobs_by_status", "Current job record count by status"),
        &["status"],
    )
    .unwrap()
});

/// Jobs holding an admission slot.
pub static ACTIVE_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mediagrab_active_jobs", "Jobs currently holding an admission slot").unwrap()
});

/// Configured egress proxies.
pub static PROXY_POOL_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mediagrab_proxy_pool_size", "Number of configured egress proxies").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    registry.register(Box::new(JOBS_BY_STATUS.clone())).unwrap();
    registry.register(Box::new(ACTIVE_JOBS.clone())).unwrap();
    registry.register(Box::new(PROXY_POOL_SIZE.clone())).unwrap();

    for metric in mediagrab_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges from the registry and orchestrator before a scrape.
pub fn collect_dynamic_metrics(state: &AppState) {
    let status = state.orchestrator().status();
    ACTIVE_JOBS.set(status.active_jobs as i64);
    PROXY_POOL_SIZE.set(status.proxy_pool_size as i64);

    if let Ok(stats) = state.registry().stats() {
        for job_status in JobStatus::ALL {
            JOBS_BY_STATUS
                .with_label_values(&[job_status.as_str()])
                .set(stats.count(job_status) as i64);
        }
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Normalize a path for metric labels.
///
/// Job ids become `{id}` and anything under `/files/` becomes `{name}`, so
/// label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    if let Some((prefix, _)) = path.split_once("/files/") {
        return format!("{}/files/{{name}}", prefix);
    }
    UUID_SEGMENT.replace_all(path, "{id}").into_owned()
}

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use mediagrab_core::{JobStatus, ProxyStatus, SanitizedConfig};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
    pub active_jobs: usize,
    pub max_active_jobs: usize,
    pub proxy_pool_size: usize,
    /// Pool entries with credentials redacted.
    pub proxies: Vec<ProxyStatus>,
}

/// Liveness plus aggregate job counts. Never fails.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.registry().stats().unwrap_or_default();
    let runtime = state.orchestrator().status();

    Json(HealthResponse {
        status: "ok".to_string(),
        total_jobs: stats.total,
        completed_jobs: stats.count(JobStatus::Completed),
        failed_jobs: stats.count(JobStatus::Failed),
        by_status: stats.by_status,
        by_error_type: stats.by_error_type,
        active_jobs: runtime.active_jobs,
        max_active_jobs: runtime.max_active_jobs,
        proxy_pool_size: runtime.proxy_pool_size,
        proxies: state.orchestrator().proxies().status(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

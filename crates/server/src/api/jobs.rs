//! Job API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use mediagrab_core::{
    CreateJobRequest, ErrorType, FormatFailure, Job, JobFilter, JobStats, JobStatus, MediaFormat,
};

use super::error::{ApiError, ApiJson, ApiQuery};
use super::middleware::ClientAddr;
use crate::state::AppState;

/// Maximum allowed limit for job listings
const MAX_LIMIT: usize = 1000;

/// Default limit for job listings
const DEFAULT_LIMIT: usize = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub formats: Vec<String>,
}

/// Response for an accepted job
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Public projection of a job record.
///
/// The requester identity and session key stay server-side.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub url: String,
    pub formats: Vec<MediaFormat>,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files: BTreeMap<MediaFormat, String>,
    /// Download paths for `files`, relative to the server root.
    pub downloads: BTreeMap<MediaFormat, String>,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub format_errors: BTreeMap<MediaFormat, FormatFailure>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let hint = job.hint();
        let downloads = job
            .files
            .iter()
            .map(|(format, name)| (*format, format!("/api/v1/files/{}", name)))
            .collect();

        Self {
            id: job.id,
            url: job.url,
            formats: job.formats.into_iter().collect(),
            status: job.status,
            progress: job.progress,
            created_at: job.created_at,
            started_at: job.started_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            files: job.files,
            downloads,
            error: job.error,
            error_type: job.error_type,
            hint,
            format_errors: job.format_errors,
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub stats: JobStats,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new job.
///
/// Returns `202 Accepted` with the job id; processing continues in the
/// background and is observed through [`get_job`].
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    ClientAddr(client): ClientAddr,
    ApiJson(body): ApiJson<CreateJobBody>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let request = CreateJobRequest {
        url: body.url.unwrap_or_default(),
        formats: body.formats,
        requested_by: client,
        session_key: None,
    };

    let job = state.orchestrator().submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let not_found = || ApiError::not_found(format!("Job not found: {}", id));
    let job_id = Uuid::parse_str(&id).map_err(|_| not_found())?;

    match state.registry().get(&job_id) {
        Ok(Some(job)) => Ok(Json(JobResponse::from(job))),
        Ok(None) => Err(not_found()),
        Err(e) => {
            warn!("Failed to read job {}: {}", job_id, e);
            Err(not_found())
        }
    }
}

/// List jobs with optional status filter and pagination
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(raw) = params.status.as_deref() {
        let status = raw
            .parse::<JobStatus>()
            .map_err(|e| ApiError::bad_request("invalid status", e))?;
        filter = filter.with_status(status);
    }

    let registry = state.registry();
    let jobs = registry.list(&filter).unwrap_or_else(|e| {
        warn!("Failed to list jobs: {}", e);
        Vec::new()
    });
    let total = registry.count(&filter).unwrap_or(jobs.len());
    let stats = registry.stats().unwrap_or_default();

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
        stats,
    }))
}

//! Types for the job orchestrator.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::failure::ErrorType;
use crate::job::RegistryError;

/// Errors that abort processing of a job.
///
/// Engine failures are not errors at this level; they are recorded on the
/// job. These are the unexpected ones, recorded as `general_error`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid url pattern: {0}")]
    InvalidUrlPattern(String),

    #[error("job task panicked: {0}")]
    Panicked(String),
}

/// Request-time rejections. Nothing is recorded in the registry for these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("url is required")]
    MissingUrl,

    #[error("url does not look like a supported media link: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    InvalidFormats(String),

    #[error("rate limited, retry in {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("server busy: {max_active} jobs already active, retry later")]
    AdmissionRejected { max_active: usize },

    #[error("failed to register job: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::MissingUrl => "missing url",
            SubmitError::InvalidUrl(_) => "invalid url shape",
            SubmitError::InvalidFormats(_) => "invalid formats",
            SubmitError::RateLimited { .. } => "rate limited",
            SubmitError::AdmissionRejected { .. } => "admission rejected",
            SubmitError::Internal(_) => "internal error",
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            SubmitError::MissingUrl
            | SubmitError::InvalidUrl(_)
            | SubmitError::InvalidFormats(_) => ErrorType::InvalidInput,
            SubmitError::RateLimited { .. } => ErrorType::RateLimited,
            SubmitError::AdmissionRejected { .. } => ErrorType::AdmissionRejected,
            SubmitError::Internal(_) => ErrorType::GeneralError,
        }
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    /// Jobs holding an admission slot.
    pub active_jobs: usize,
    /// Configured concurrency cap.
    pub max_active_jobs: usize,
    /// Spawned job tasks that have not finished.
    pub running_tasks: usize,
    /// Configured egress proxies.
    pub proxy_pool_size: usize,
}

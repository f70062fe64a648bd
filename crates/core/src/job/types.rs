//! Core job data types and the lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::failure::ErrorType;

/// Progress reported when a job enters `processing`.
pub const PROCESSING_START_PROGRESS: u8 = 5;

// ============================================================================
// Formats
// ============================================================================

/// A derived artifact a job can produce.
///
/// The declaration order is the processing order: video first so that the
/// audio fallback and silent-video derivation can reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Video,
    Audio,
    SilentVideo,
}

impl MediaFormat {
    pub const ALL: [MediaFormat; 3] = [
        MediaFormat::Video,
        MediaFormat::Audio,
        MediaFormat::SilentVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::SilentVideo => "silent_video",
        }
    }

    /// Suffix used in artifact file names: `{job_id}_{suffix}.{ext}`.
    pub fn artifact_suffix(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::SilentVideo => "silent",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "silent_video" => Ok(Self::SilentVideo),
            other => Err(format!("unknown format: {}", other)),
        }
    }
}

/// Parse a requested format list into a canonical, non-empty set.
pub fn parse_formats<S: AsRef<str>>(raw: &[S]) -> Result<BTreeSet<MediaFormat>, String> {
    if raw.is_empty() {
        return Err("at least one format is required".to_string());
    }
    raw.iter().map(|s| s.as_ref().parse()).collect()
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status. `queued -> processing -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// Why a single format could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatFailure {
    pub error_type: ErrorType,
    pub message: String,
}

impl FormatFailure {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }
}

/// Errors raised by an illegal lifecycle operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("cannot {action} job {job_id}: status is {status}")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        action: &'static str,
    },

    #[error("job {0} has no produced files")]
    NoArtifacts(Uuid),
}

/// Request to create a new job. Validation happens in the orchestrator.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub url: String,
    pub formats: Vec<String>,
    /// Client network identity; the admission-time rate-limit key.
    pub requested_by: String,
    /// Per-job pacing key. Defaults to `requested_by`.
    pub session_key: Option<String>,
}

/// One acquisition request and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub formats: BTreeSet<MediaFormat>,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Produced file names (relative to the output directory), per format.
    pub files: BTreeMap<MediaFormat, String>,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
    /// Formats whose cascade was exhausted, even if the job completed.
    pub format_errors: BTreeMap<MediaFormat, FormatFailure>,
    pub requested_by: String,
    pub session_key: String,
}

impl Job {
    /// Create a queued job.
    pub fn new(
        url: impl Into<String>,
        formats: BTreeSet<MediaFormat>,
        requested_by: impl Into<String>,
        session_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let requested_by = requested_by.into();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            formats,
            status: JobStatus::Queued,
            progress: 0,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
            files: BTreeMap::new(),
            error: None,
            error_type: None,
            format_errors: BTreeMap::new(),
            session_key: session_key.unwrap_or_else(|| requested_by.clone()),
            requested_by,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_processing(&self, action: &'static str) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                job_id: self.id,
                status: self.status,
                action,
            });
        }
        Ok(())
    }

    /// `queued -> processing`.
    pub fn start(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Queued {
            return Err(JobError::InvalidTransition {
                job_id: self.id,
                status: self.status,
                action: "start",
            });
        }
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.progress = PROCESSING_START_PROGRESS;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Raise progress. Never decreases and stays within `1..=99` while processing.
    pub fn advance(&mut self, progress: u8) -> Result<(), JobError> {
        self.ensure_processing("advance")?;
        self.progress = progress.clamp(1, 99).max(self.progress);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_file(&mut self, format: MediaFormat, file_name: String) -> Result<(), JobError> {
        self.ensure_processing("record file for")?;
        self.files.insert(format, file_name);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_format_failure(
        &mut self,
        format: MediaFormat,
        failure: FormatFailure,
    ) -> Result<(), JobError> {
        self.ensure_processing("record failure for")?;
        self.format_errors.insert(format, failure);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `processing -> completed`. Requires at least one produced file.
    pub fn complete(&mut self) -> Result<(), JobError> {
        self.ensure_processing("complete")?;
        if self.files.is_empty() {
            return Err(JobError::NoArtifacts(self.id));
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `processing -> failed`. Progress keeps its last observed value.
    pub fn fail(&mut self, error_type: ErrorType, message: impl Into<String>) -> Result<(), JobError> {
        self.ensure_processing("fail")?;
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.error_type = Some(error_type);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Hint for the recorded classification, if any.
    pub fn hint(&self) -> Option<&'static str> {
        self.error_type.map(|e| e.hint())
    }
}

//! Job records, lifecycle, and the registry that owns them.

mod registry;
mod types;

pub use registry::{InMemoryJobRegistry, JobFilter, JobRegistry, JobStats, RegistryError};
pub use types::{
    parse_formats, CreateJobRequest, FormatFailure, Job, JobError, JobStatus, MediaFormat,
    PROCESSING_START_PROGRESS,
};

//! Job registry trait and in-memory implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::failure::ErrorType;
use crate::job::{Job, JobError, JobStatus};

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job already exists: {0}")]
    AlreadyExists(Uuid),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("job registry lock poisoned")]
    Poisoned,
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Maximum number of results.
    pub limit: usize,
    /// Offset for pagination.
    pub offset: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
    }
}

/// Aggregate counts over all job records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
}

impl JobStats {
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Authoritative store of job records.
///
/// Mutation goes through [`JobRegistry::update`], which applies the closure to
/// a copy and commits only if it returns `Ok`, so a rejected transition leaves
/// the stored record untouched.
pub trait JobRegistry: Send + Sync {
    /// Insert a new job record.
    fn insert(&self, job: Job) -> Result<(), RegistryError>;

    /// Get a snapshot of a job by ID.
    fn get(&self, id: &Uuid) -> Result<Option<Job>, RegistryError>;

    /// Apply a mutation atomically and return the updated record.
    fn update(
        &self,
        id: &Uuid,
        f: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, RegistryError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, RegistryError>;

    /// Count jobs matching the filter (ignores limit/offset).
    fn count(&self, filter: &JobFilter) -> Result<usize, RegistryError>;

    /// Aggregate counts per status and per error classification.
    fn stats(&self) -> Result<JobStats, RegistryError>;

    /// Remove terminal jobs that finished before `cutoff`. Returns how many were removed.
    fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RegistryError>;
}

/// Process-local registry. Records do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn insert(&self, job: Job) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| RegistryError::Poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<Option<Job>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(jobs.get(id).cloned())
    }

    fn update(
        &self,
        id: &Uuid,
        f: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| RegistryError::Poisoned)?;
        let current = jobs.get(id).ok_or(RegistryError::NotFound(*id))?;

        let mut next = current.clone();
        f(&mut next)?;
        jobs.insert(*id, next.clone());
        Ok(next)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::Poisoned)?;
        let mut matching: Vec<&Job> = jobs.values().filter(|j| filter.matches(j)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect())
    }

    fn count(&self, filter: &JobFilter) -> Result<usize, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(jobs.values().filter(|j| filter.matches(j)).count())
    }

    fn stats(&self) -> Result<JobStats, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::Poisoned)?;

        let mut stats = JobStats {
            total: jobs.len(),
            by_status: JobStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect(),
            by_error_type: ErrorType::ALL
                .iter()
                .map(|e| (e.as_str().to_string(), 0))
                .collect(),
        };

        for job in jobs.values() {
            *stats
                .by_status
                .entry(job.status.as_str().to_string())
                .or_default() += 1;
            if let Some(error_type) = job.error_type {
                *stats
                    .by_error_type
                    .entry(error_type.as_str().to_string())
                    .or_default() += 1;
            }
        }

        Ok(stats)
    }

    fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| RegistryError::Poisoned)?;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.is_terminal() && job.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok(before - jobs.len())
    }
}

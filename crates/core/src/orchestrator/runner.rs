//! Job orchestrator implementation.
//!
//! Each admitted job runs as its own tokio task:
//! - Submission: validation, admission, client rate limit (synchronous)
//! - Processing: session rate limit, then one strategy cascade per format
//! - Derivations: audio demux fallback and silent video via the transcoder

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use regex_lite::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::config::Config;
use crate::downloader::{
    artifact_stem, file_name_of, random_jitter, CascadeOutcome, StrategyCascade, StrategySet,
    TranscodeOp, Transcoder,
};
use crate::failure::ErrorType;
use crate::job::{
    parse_formats, CreateJobRequest, FormatFailure, Job, JobRegistry, JobStatus, MediaFormat,
    PROCESSING_START_PROGRESS,
};
use crate::metrics;
use crate::process::CommandRunner;
use crate::proxy::ProxyRotator;
use crate::rate_limit::RateLimiter;

use super::config::PacingConfig;
use super::types::{OrchestratorError, OrchestratorStatus, SubmitError};

/// One unit of work inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    format: MediaFormat,
    /// Acquired only as input for another format; never listed in `files`.
    intermediate: bool,
}

/// Ordered steps for a requested format set.
///
/// Silent video is derived from video, so video is acquired first even when
/// only silent video was requested.
fn plan_steps(formats: &BTreeSet<MediaFormat>) -> Vec<Step> {
    let mut steps = Vec::new();
    if formats.contains(&MediaFormat::Video) || formats.contains(&MediaFormat::SilentVideo) {
        steps.push(Step {
            format: MediaFormat::Video,
            intermediate: !formats.contains(&MediaFormat::Video),
        });
    }
    if formats.contains(&MediaFormat::Audio) {
        steps.push(Step {
            format: MediaFormat::Audio,
            intermediate: false,
        });
    }
    if formats.contains(&MediaFormat::SilentVideo) {
        steps.push(Step {
            format: MediaFormat::SilentVideo,
            intermediate: false,
        });
    }
    steps
}

/// Progress after `done` of `total` steps, within the processing range.
fn step_progress(done: usize, total: usize) -> u8 {
    let start = PROCESSING_START_PROGRESS as usize;
    let span = 95 - start;
    (start + done * span / total.max(1)) as u8
}

/// Per-job scratch state while formats are processed.
#[derive(Debug, Default)]
struct JobRun {
    /// Video artifact on disk, whether requested or intermediate.
    video: Option<PathBuf>,
    video_failure: Option<FormatFailure>,
    produced: usize,
    failures: BTreeMap<MediaFormat, FormatFailure>,
    /// Classification of the most recent failed engine invocation.
    last_error: Option<ErrorType>,
}

/// Drives jobs from admission to a terminal state.
pub struct JobOrchestrator {
    registry: Arc<dyn JobRegistry>,
    admission: AdmissionController,
    client_limiter: RateLimiter,
    session_limiter: RateLimiter,
    proxies: Arc<ProxyRotator>,
    cascade: StrategyCascade,
    transcoder: Transcoder,
    strategies: StrategySet,
    pacing: PacingConfig,
    output_dir: PathBuf,
    url_pattern: Regex,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl JobOrchestrator {
    /// Create an orchestrator from configuration.
    pub fn new(
        config: &Config,
        registry: Arc<dyn JobRegistry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, OrchestratorError> {
        let url_pattern = Regex::new(&config.extractor.url_pattern)
            .map_err(|e| OrchestratorError::InvalidUrlPattern(e.to_string()))?;
        let proxies = Arc::new(ProxyRotator::new(config.proxies.iter().cloned()));

        Ok(Self {
            registry,
            admission: AdmissionController::new(config.admission.max_active_jobs),
            client_limiter: RateLimiter::new(config.rate_limit.client_interval()),
            session_limiter: RateLimiter::new(config.rate_limit.session_interval()),
            cascade: StrategyCascade::new(
                Arc::clone(&runner),
                Arc::clone(&proxies),
                config.extractor.clone(),
                config.pacing.strategy_backoff(),
            ),
            transcoder: Transcoder::new(runner, config.transcoder.clone()),
            proxies,
            strategies: StrategySet::default(),
            pacing: config.pacing.clone(),
            output_dir: config.storage.output_dir.clone(),
            url_pattern,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the default strategy tables.
    pub fn with_strategies(mut self, strategies: StrategySet) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn registry(&self) -> &Arc<dyn JobRegistry> {
        &self.registry
    }

    pub fn proxies(&self) -> &Arc<ProxyRotator> {
        &self.proxies
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Validate, admit, and start a job.
    ///
    /// Rejections are synchronous and leave no registry entry. On success the
    /// job is returned in its `queued` snapshot and processing continues in
    /// the background.
    pub async fn submit(self: &Arc<Self>, request: CreateJobRequest) -> Result<Job, SubmitError> {
        let result = self.admit(request).await;
        match &result {
            Ok(job) => {
                metrics::JOBS_SUBMITTED.inc();
                info!(
                    "Job {} queued: {} [{}] for {}",
                    job.id,
                    job.url,
                    job.formats
                        .iter()
                        .map(MediaFormat::as_str)
                        .collect::<Vec<_>>()
                        .join(","),
                    job.requested_by
                );
            }
            Err(e) => {
                metrics::SUBMISSIONS_REJECTED
                    .with_label_values(&[e.error_type().as_str()])
                    .inc();
                info!("Rejected job submission: {}", e);
            }
        }
        result
    }

    async fn admit(self: &Arc<Self>, request: CreateJobRequest) -> Result<Job, SubmitError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(SubmitError::MissingUrl);
        }
        if !self.url_pattern.is_match(url) {
            return Err(SubmitError::InvalidUrl(url.to_string()));
        }
        let formats = parse_formats(&request.formats).map_err(SubmitError::InvalidFormats)?;

        let permit = self
            .admission
            .try_admit()
            .ok_or(SubmitError::AdmissionRejected {
                max_active: self.admission.max_active(),
            })?;

        // The permit is dropped on this path, releasing the slot.
        self.client_limiter
            .check_and_record(&request.requested_by)
            .await
            .map_err(|retry_after| SubmitError::RateLimited { retry_after })?;

        let job = Job::new(url, formats, request.requested_by, request.session_key);
        self.registry
            .insert(job.clone())
            .map_err(|e| SubmitError::Internal(e.to_string()))?;

        self.spawn_job(job.id, permit);
        Ok(job)
    }

    fn spawn_job(self: &Arc<Self>, job_id: Uuid, permit: AdmissionPermit) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // Held until the job is terminal, whatever happens inside.
            let _permit = permit;
            let started = Instant::now();

            let worker = {
                let this = Arc::clone(&this);
                tokio::spawn(async move { this.process(job_id).await })
            };

            let outcome = match worker.await {
                Ok(result) => result,
                Err(join_err) => Err(OrchestratorError::Panicked(panic_message(join_err))),
            };
            if let Err(e) = outcome {
                error!("Job {} aborted: {}", job_id, e);
                this.fail_unexpected(job_id, &e);
            }

            metrics::JOB_DURATION.observe(started.elapsed().as_secs_f64());
            if let Ok(mut tasks) = this.tasks.lock() {
                tasks.remove(&job_id);
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|_, h| !h.is_finished());
            if !handle.is_finished() {
                tasks.insert(job_id, handle);
            }
        }
    }

    /// Record an unexpected error as `general_error` unless the job is already terminal.
    fn fail_unexpected(&self, job_id: Uuid, err: &OrchestratorError) {
        let message = format!("internal error: {}", err);
        let mut transitioned = false;
        let result = self.registry.update(&job_id, &mut |job| {
            match job.status {
                JobStatus::Completed | JobStatus::Failed => return Ok(()),
                JobStatus::Queued => job.start()?,
                JobStatus::Processing => {}
            }
            job.fail(ErrorType::GeneralError, message.clone())?;
            transitioned = true;
            Ok(())
        });

        match result {
            Ok(job) if transitioned => record_finished(&job),
            Ok(_) => {}
            Err(e) => error!("Job {}: could not record failure: {}", job_id, e),
        }
    }

    async fn process(&self, job_id: Uuid) -> Result<(), OrchestratorError> {
        let job = self.registry.update(&job_id, &mut |job| job.start())?;
        info!("Job {} processing", job_id);

        if let Err(wait) = self.session_limiter.check_and_record(&job.session_key).await {
            let message = format!(
                "session {} is rate limited, retry in {}s",
                job.session_key,
                wait.as_secs().max(1)
            );
            warn!("Job {}: {}", job_id, message);
            let job = self
                .registry
                .update(&job_id, &mut |job| job.fail(ErrorType::RateLimited, message.clone()))?;
            record_finished(&job);
            return Ok(());
        }

        let steps = plan_steps(&job.formats);
        let mut run = JobRun::default();

        for (index, step) in steps.iter().enumerate() {
            if index > 0 {
                self.pace(job_id).await;
            }

            self.run_step(&job, *step, &mut run).await?;

            let progress = step_progress(index + 1, steps.len());
            self.registry
                .update(&job_id, &mut |job| job.advance(progress))?;
        }

        self.discard_intermediate(&steps, &run).await;
        self.finish(&job, run)
    }

    async fn pace(&self, job_id: Uuid) {
        let delay = self.pacing.format_delay() + random_jitter(self.pacing.format_jitter());
        if !delay.is_zero() {
            debug!("Job {}: pausing {}ms before next format", job_id, delay.as_millis());
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_step(
        &self,
        job: &Job,
        step: Step,
        run: &mut JobRun,
    ) -> Result<(), OrchestratorError> {
        let result = match step.format {
            MediaFormat::Video => {
                let result = self.acquire(job, MediaFormat::Video).await;
                match &result {
                    Ok(path) => run.video = Some(path.clone()),
                    Err(failure) => run.video_failure = Some(failure.clone()),
                }
                result
            }
            MediaFormat::Audio => match self.acquire(job, MediaFormat::Audio).await {
                Ok(path) => Ok(path),
                Err(failure) => self.demux_fallback(job, run.video.as_deref(), failure).await,
            },
            MediaFormat::SilentVideo => self.derive_silent(job, run).await,
        };

        // Without a video artifact no transcoder ran for silent video.
        let invoked = step.format != MediaFormat::SilentVideo || run.video.is_some();
        if let (true, Err(failure)) = (invoked, &result) {
            run.last_error = Some(failure.error_type);
        }

        if step.intermediate {
            return Ok(());
        }

        match result {
            Ok(path) => {
                let name = file_name_of(&path);
                self.registry
                    .update(&job.id, &mut |j| j.record_file(step.format, name.clone()))?;
                run.produced += 1;
            }
            Err(failure) => {
                warn!(
                    "Job {}: {} not produced ({}): {}",
                    job.id, step.format, failure.error_type, failure.message
                );
                self.registry.update(&job.id, &mut |j| {
                    j.record_format_failure(step.format, failure.clone())
                })?;
                run.failures.insert(step.format, failure);
            }
        }
        Ok(())
    }

    async fn acquire(&self, job: &Job, format: MediaFormat) -> Result<PathBuf, FormatFailure> {
        let outcome = self
            .cascade
            .acquire(
                job.id,
                &job.url,
                format,
                self.strategies.for_format(format),
                &self.output_dir,
            )
            .await;

        match outcome {
            CascadeOutcome::Produced { path, .. } => Ok(path),
            CascadeOutcome::Exhausted { failure, .. } => Err(failure),
        }
    }

    /// Last resort for audio: demux it from the job's video artifact.
    async fn demux_fallback(
        &self,
        job: &Job,
        video: Option<&Path>,
        failure: FormatFailure,
    ) -> Result<PathBuf, FormatFailure> {
        let Some(video) = video else {
            return Err(failure);
        };

        info!("Job {}: audio extraction failed, demuxing from video", job.id);
        let output = self.derived_path(job.id, MediaFormat::Audio, video, TranscodeOp::DemuxAudio);
        match self
            .transcoder
            .transcode(TranscodeOp::DemuxAudio, video, &output)
            .await
        {
            Ok(()) => Ok(output),
            Err(e) => Err(FormatFailure::new(
                ErrorType::GeneralError,
                format!("{}; demux fallback failed: {}", failure.message, e),
            )),
        }
    }

    async fn derive_silent(&self, job: &Job, run: &JobRun) -> Result<PathBuf, FormatFailure> {
        let Some(video) = run.video.as_deref() else {
            let (error_type, cause) = match &run.video_failure {
                Some(f) => (f.error_type, f.message.as_str()),
                None => (ErrorType::GeneralError, "video was not acquired"),
            };
            return Err(FormatFailure::new(
                error_type,
                format!("silent video requires a video artifact: {}", cause),
            ));
        };

        let output =
            self.derived_path(job.id, MediaFormat::SilentVideo, video, TranscodeOp::StripAudio);
        self.transcoder
            .transcode(TranscodeOp::StripAudio, video, &output)
            .await
            .map(|()| output)
            .map_err(|e| FormatFailure::new(ErrorType::GeneralError, e.to_string()))
    }

    fn derived_path(
        &self,
        job_id: Uuid,
        format: MediaFormat,
        input: &Path,
        op: TranscodeOp,
    ) -> PathBuf {
        let input_ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        self.output_dir.join(format!(
            "{}.{}",
            artifact_stem(&job_id, format),
            op.output_extension(input_ext)
        ))
    }

    async fn discard_intermediate(&self, steps: &[Step], run: &JobRun) {
        let intermediate_video = steps
            .iter()
            .any(|s| s.format == MediaFormat::Video && s.intermediate);
        if let (true, Some(video)) = (intermediate_video, run.video.as_deref()) {
            if let Err(e) = tokio::fs::remove_file(video).await {
                warn!("Failed to remove intermediate {}: {}", video.display(), e);
            }
        }
    }

    fn finish(&self, job: &Job, run: JobRun) -> Result<(), OrchestratorError> {
        let finished = if run.produced > 0 {
            self.registry.update(&job.id, &mut |j| j.complete())?
        } else {
            let (error_type, message) = summarize_failures(&run.failures, run.last_error);
            self.registry
                .update(&job.id, &mut |j| j.fail(error_type, message.clone()))?
        };

        match finished.status {
            JobStatus::Completed => info!(
                "Job {} completed: {}",
                job.id,
                finished.files.values().cloned().collect::<Vec<_>>().join(", ")
            ),
            _ => warn!(
                "Job {} failed ({}): {}",
                job.id,
                finished
                    .error_type
                    .map(|e| e.as_str())
                    .unwrap_or("unknown"),
                finished.error.as_deref().unwrap_or("")
            ),
        }
        record_finished(&finished);
        Ok(())
    }

    /// Snapshot of runtime state.
    pub fn status(&self) -> OrchestratorStatus {
        let running_tasks = self
            .tasks
            .lock()
            .map(|tasks| tasks.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0);

        OrchestratorStatus {
            active_jobs: self.admission.active(),
            max_active_jobs: self.admission.max_active(),
            running_tasks,
            proxy_pool_size: self.proxies.len(),
        }
    }

    /// Wait for one job's task to finish, then return its record.
    pub async fn wait_for(&self, job_id: &Uuid) -> Option<Job> {
        let handle = self.tasks.lock().ok().and_then(|mut t| t.remove(job_id));
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Job {} task ended abnormally: {}", job_id, e);
            }
        }
        self.registry.get(job_id).ok().flatten()
    }

    /// Wait for every running job task to finish.
    pub async fn drain(&self) {
        let handles: Vec<_> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().map(|(_, h)| h).collect(),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }

        info!("Waiting for {} running job(s)", handles.len());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Job task ended abnormally: {}", e);
            }
        }
    }
}

/// Classification and message for a job where no format was produced.
///
/// The job takes the classification of the last failed engine invocation.
fn summarize_failures(
    failures: &BTreeMap<MediaFormat, FormatFailure>,
    last_error: Option<ErrorType>,
) -> (ErrorType, String) {
    let error_type = last_error.unwrap_or(ErrorType::GeneralError);

    let message = if failures.is_empty() {
        "no format was produced".to_string()
    } else {
        failures
            .iter()
            .map(|(format, f)| format!("{}: {}", format, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    };
    (error_type, message)
}

fn record_finished(job: &Job) {
    let error_type = job.error_type.map(|e| e.as_str()).unwrap_or("none");
    metrics::JOBS_FINISHED
        .with_label_values(&[job.status.as_str(), error_type])
        .inc();
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats(list: &[MediaFormat]) -> BTreeSet<MediaFormat> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_plan_video_and_audio() {
        let steps = plan_steps(&formats(&[MediaFormat::Audio, MediaFormat::Video]));
        assert_eq!(
            steps,
            vec![
                Step { format: MediaFormat::Video, intermediate: false },
                Step { format: MediaFormat::Audio, intermediate: false },
            ]
        );
    }

    #[test]
    fn test_plan_silent_only_adds_intermediate_video() {
        let steps = plan_steps(&formats(&[MediaFormat::SilentVideo]));
        assert_eq!(
            steps,
            vec![
                Step { format: MediaFormat::Video, intermediate: true },
                Step { format: MediaFormat::SilentVideo, intermediate: false },
            ]
        );
    }

    #[test]
    fn test_step_progress_stays_in_processing_range() {
        assert_eq!(step_progress(0, 3), PROCESSING_START_PROGRESS);
        assert!(step_progress(1, 3) > PROCESSING_START_PROGRESS);
        assert!(step_progress(3, 3) < 100);
        assert_eq!(step_progress(1, 1), 95);
    }

    #[test]
    fn test_summarize_failures_uses_last_engine_error() {
        let mut failures = BTreeMap::new();
        failures.insert(
            MediaFormat::Audio,
            FormatFailure::new(ErrorType::ExtractionError, "no audio"),
        );
        failures.insert(
            MediaFormat::Video,
            FormatFailure::new(ErrorType::BotDetection, "Sign in to confirm"),
        );

        let (error_type, message) =
            summarize_failures(&failures, Some(ErrorType::ExtractionError));
        assert_eq!(error_type, ErrorType::ExtractionError);
        assert_eq!(message, "video: Sign in to confirm; audio: no audio");

        let (error_type, message) = summarize_failures(&BTreeMap::new(), None);
        assert_eq!(error_type, ErrorType::GeneralError);
        assert_eq!(message, "no format was produced");
    }
}

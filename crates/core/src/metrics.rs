//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Submission (accepted jobs, rejections by classification)
//! - Processing (strategy attempts, transcodes, finished jobs, duration)
//! - Retention (files swept, job records pruned)

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Submission
// =============================================================================

/// Jobs accepted into the registry.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("mediagrab_jobs_submitted_total", "Total jobs admitted").unwrap()
});

/// Submissions rejected before a job was created.
pub static SUBMISSIONS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagrab_submissions_rejected_total",
            "Job submissions rejected at request time",
        ),
        &["error_type"], // "invalid_input", "rate_limited", "admission_rejected"
    )
    .unwrap()
});

// =============================================================================
// Processing
// =============================================================================

/// Jobs reaching a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediagrab_jobs_finished_total", "Jobs reaching a terminal state"),
        &["status", "error_type"],
    )
    .unwrap()
});

/// Time from admission to terminal state.
pub static JOB_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "mediagrab_job_duration_seconds",
            "Wall time from admission to terminal state",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
    )
    .unwrap()
});

/// Extraction attempts by format, strategy, and result.
pub static STRATEGY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagrab_strategy_attempts_total",
            "Extractor invocations per strategy",
        ),
        &["format", "strategy", "result"],
    )
    .unwrap()
});

/// Transcoder invocations.
pub static TRANSCODES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediagrab_transcodes_total", "Transcoder invocations"),
        &["operation", "result"],
    )
    .unwrap()
});

// =============================================================================
// Retention
// =============================================================================

pub static FILES_SWEPT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediagrab_files_swept_total",
        "Expired files deleted by the retention sweep",
    )
    .unwrap()
});

pub static JOB_RECORDS_PRUNED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediagrab_job_records_pruned_total",
        "Terminal job records removed by the retention sweep",
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(SUBMISSIONS_REJECTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(STRATEGY_ATTEMPTS.clone()),
        Box::new(TRANSCODES_TOTAL.clone()),
        Box::new(FILES_SWEPT.clone()),
        Box::new(JOB_RECORDS_PRUNED.clone()),
    ]
}

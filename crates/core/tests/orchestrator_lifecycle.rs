//! End-to-end job lifecycle tests against the scripted engine runner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mediagrab_core::job::JobFilter;
use mediagrab_core::testing::{ScriptedOutcome, ScriptedRunner};
use mediagrab_core::{
    Config, CreateJobRequest, ErrorType, InMemoryJobRegistry, Job, JobOrchestrator, JobRegistry,
    JobStatus, MediaFormat, PacingConfig, SubmitError,
};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

struct Harness {
    _dir: TempDir,
    output_dir: PathBuf,
    runner: Arc<ScriptedRunner>,
    registry: Arc<InMemoryJobRegistry>,
    orchestrator: Arc<JobOrchestrator>,
}

fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.output_dir = dir.path().to_path_buf();
    config.pacing = PacingConfig::immediate();
    config.rate_limit.client_interval_secs = 0;
    config.rate_limit.session_interval_secs = 0;
    configure(&mut config);

    let runner = Arc::new(ScriptedRunner::new());
    let registry = Arc::new(InMemoryJobRegistry::new());
    let orchestrator = Arc::new(
        JobOrchestrator::new(&config, registry.clone(), runner.clone()).unwrap(),
    );

    Harness {
        output_dir: dir.path().to_path_buf(),
        _dir: dir,
        runner,
        registry,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn request(client: &str, formats: &[&str]) -> CreateJobRequest {
    CreateJobRequest {
        url: URL.to_string(),
        formats: formats.iter().map(|f| f.to_string()).collect(),
        requested_by: client.to_string(),
        session_key: None,
    }
}

fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued => 0,
        JobStatus::Processing => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    }
}

async fn run_to_end(h: &Harness, req: CreateJobRequest) -> Job {
    let job = assert_ok!(h.orchestrator.submit(req).await);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress, 0);
    h.orchestrator.wait_for(&job.id).await.unwrap()
}

#[tokio::test]
async fn test_rate_limited_first_strategy_then_success_completes() {
    let h = harness();
    h.runner
        .script_failure("yt-dlp", 1, "ERROR: HTTP Error 429: Too Many Requests")
        .await;

    let job = run_to_end(&h, request("10.0.0.1", &["video", "audio"])).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());
    assert_eq!(job.error_type, None);
    assert!(job.format_errors.is_empty());
    assert_eq!(
        job.files.get(&MediaFormat::Video),
        Some(&format!("{}_video.mp4", job.id))
    );
    assert_eq!(
        job.files.get(&MediaFormat::Audio),
        Some(&format!("{}_audio.mp3", job.id))
    );
    assert!(h.output_dir.join(format!("{}_video.mp4", job.id)).exists());

    // 429 on the first video strategy, success on the second, one audio call.
    assert_eq!(h.runner.calls_for("yt-dlp").await.len(), 3);
    assert!(h.runner.calls_for("ffmpeg").await.is_empty());
}

#[tokio::test]
async fn test_all_strategies_hit_sign_in_wall_fails_with_bot_detection() {
    let h = harness();
    for _ in 0..8 {
        h.runner
            .script_failure(
                "yt-dlp",
                1,
                "ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm you're not a bot",
            )
            .await;
    }

    let job = run_to_end(&h, request("10.0.0.1", &["video"])).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type, Some(ErrorType::BotDetection));
    assert!(job.hint().unwrap().contains("prox"));
    assert!(job.files.is_empty());
    assert!(job.progress > 0 && job.progress < 100);
    assert!(job.completed_at.is_some());
    assert_eq!(
        job.format_errors[&MediaFormat::Video].error_type,
        ErrorType::BotDetection
    );

    // No artifacts or partials left behind.
    assert_eq!(std::fs::read_dir(&h.output_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_admission_at_cap_is_rejected_without_registry_entry() {
    let h = harness_with(|c| c.admission.max_active_jobs = 1);
    h.runner.set_delay(Duration::from_millis(200)).await;

    let first = assert_ok!(h.orchestrator.submit(request("10.0.0.1", &["video"])).await);
    let rejected = assert_err!(h.orchestrator.submit(request("10.0.0.2", &["video"])).await);

    assert!(matches!(
        rejected,
        SubmitError::AdmissionRejected { max_active: 1 }
    ));
    assert_eq!(rejected.error_type(), ErrorType::AdmissionRejected);
    assert_eq!(h.registry.count(&JobFilter::new()).unwrap(), 1);
    assert_eq!(h.orchestrator.status().active_jobs, 1);

    let done = h.orchestrator.wait_for(&first.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(h.orchestrator.status().active_jobs, 0);

    // Slot released: a new job is admitted.
    assert_ok!(h.orchestrator.submit(request("10.0.0.2", &["video"])).await);
    h.orchestrator.drain().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_never_exceed_cap() {
    let h = harness_with(|c| c.admission.max_active_jobs = 2);
    h.runner.set_delay(Duration::from_millis(30)).await;

    let registry = h.registry.clone();
    let monitor = tokio::spawn(async move {
        let mut peak = 0;
        for _ in 0..100 {
            let processing = registry
                .count(&JobFilter::new().with_status(JobStatus::Processing))
                .unwrap();
            peak = peak.max(processing);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        peak
    });

    let mut accepted = 0;
    for round in 0..10 {
        for client in 0..3 {
            let req = request(&format!("10.0.{}.{}", round, client), &["video", "audio"]);
            if h.orchestrator.submit(req).await.is_ok() {
                accepted += 1;
            }
            assert!(h.orchestrator.status().active_jobs <= 2);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    h.orchestrator.drain().await;

    assert!(accepted >= 2);
    assert!(monitor.await.unwrap() <= 2);
    assert!(h.runner.peak_in_flight() <= 2);
    assert_eq!(h.orchestrator.status().active_jobs, 0);

    let stats = h.registry.stats().unwrap();
    assert_eq!(stats.total, accepted);
    assert_eq!(stats.count(JobStatus::Completed), accepted);
}

#[tokio::test]
async fn test_audio_falls_back_to_demux_from_video() {
    let h = harness();
    for _ in 0..3 {
        h.runner
            .script_when(
                "yt-dlp",
                "_audio.",
                ScriptedOutcome::Failure {
                    exit_code: 1,
                    stderr: "ERROR: Requested format is not available".to_string(),
                },
            )
            .await;
    }

    let job = run_to_end(&h, request("10.0.0.1", &["video", "audio"])).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.files.get(&MediaFormat::Audio),
        Some(&format!("{}_audio.mp3", job.id))
    );
    assert!(job.format_errors.is_empty());

    let ffmpeg = h.runner.calls_for("ffmpeg").await;
    assert_eq!(ffmpeg.len(), 1);
    assert!(ffmpeg[0].args.contains(&"-vn".to_string()));
    assert_eq!(
        ffmpeg[0].arg_value("-i"),
        Some(
            h.output_dir
                .join(format!("{}_video.mp4", job.id))
                .to_str()
                .unwrap()
        )
    );
}

#[tokio::test]
async fn test_audio_failure_with_failed_demux_still_completes_with_video() {
    let h = harness();
    for _ in 0..3 {
        h.runner
            .script_when(
                "yt-dlp",
                "_audio.",
                ScriptedOutcome::Failure {
                    exit_code: 1,
                    stderr: "ERROR: Unable to extract audio".to_string(),
                },
            )
            .await;
    }
    h.runner
        .script_failure("ffmpeg", 1, "Output file does not contain any stream")
        .await;

    let job = run_to_end(&h, request("10.0.0.1", &["audio", "video"])).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.files.contains_key(&MediaFormat::Video));
    assert!(!job.files.contains_key(&MediaFormat::Audio));
    let audio_error = &job.format_errors[&MediaFormat::Audio];
    // The transcoder was the last to fail.
    assert_eq!(audio_error.error_type, ErrorType::GeneralError);
    assert!(audio_error.message.contains("demux fallback failed"));
    assert_eq!(job.error_type, None);
}

#[tokio::test]
async fn test_job_error_type_follows_last_failed_format() {
    let h = harness();
    for _ in 0..8 {
        h.runner
            .script_when(
                "yt-dlp",
                "_video.",
                ScriptedOutcome::Failure {
                    exit_code: 1,
                    stderr: "ERROR: [youtube] x: Sign in to confirm you're not a bot".to_string(),
                },
            )
            .await;
        h.runner
            .script_when(
                "yt-dlp",
                "_audio.",
                ScriptedOutcome::Failure {
                    exit_code: 1,
                    stderr: "ERROR: [youtube] x: Private video".to_string(),
                },
            )
            .await;
    }

    let job = run_to_end(&h, request("10.0.0.1", &["video", "audio"])).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.format_errors[&MediaFormat::Video].error_type,
        ErrorType::BotDetection
    );
    assert_eq!(
        job.format_errors[&MediaFormat::Audio].error_type,
        ErrorType::VideoUnavailable
    );
    assert_eq!(job.error_type, Some(ErrorType::VideoUnavailable));
}

#[tokio::test(start_paused = true)]
async fn test_formats_are_paced_apart() {
    let h = harness_with(|c| {
        c.pacing = PacingConfig {
            format_delay_ms: 5000,
            ..PacingConfig::immediate()
        }
    });

    let job = run_to_end(&h, request("10.0.0.1", &["video", "audio"])).await;
    assert_eq!(job.status, JobStatus::Completed);

    let started = h.runner.call_instants().await;
    assert_eq!(started.len(), 2);
    let gap = started[1] - started[0];
    assert!(gap >= Duration::from_millis(5000), "gap was {:?}", gap);
    assert!(gap < Duration::from_millis(6000), "gap was {:?}", gap);
}

#[tokio::test]
async fn test_silent_video_only_uses_intermediate_video() {
    let h = harness();

    let job = run_to_end(&h, request("10.0.0.1", &["silent_video"])).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files.len(), 1);
    let silent = &job.files[&MediaFormat::SilentVideo];
    assert_eq!(silent, &format!("{}_silent.mp4", job.id));
    assert!(h.output_dir.join(silent).exists());
    // The intermediate video is not kept.
    assert!(!h.output_dir.join(format!("{}_video.mp4", job.id)).exists());

    let ffmpeg = h.runner.calls_for("ffmpeg").await;
    assert_eq!(ffmpeg.len(), 1);
    assert!(ffmpeg[0].args.contains(&"-an".to_string()));
}

#[tokio::test]
async fn test_silent_video_without_video_reports_video_cause() {
    let h = harness();
    for _ in 0..4 {
        h.runner
            .script_failure("yt-dlp", 1, "ERROR: [youtube] x: Video unavailable")
            .await;
    }

    let job = run_to_end(&h, request("10.0.0.1", &["silent_video"])).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type, Some(ErrorType::VideoUnavailable));
    assert!(h.runner.calls_for("ffmpeg").await.is_empty());
}

#[tokio::test]
async fn test_client_rate_limit_rejects_second_request() {
    let h = harness_with(|c| c.rate_limit.client_interval_secs = 60);

    assert_ok!(h.orchestrator.submit(request("10.0.0.1", &["video"])).await);
    let err = assert_err!(h.orchestrator.submit(request("10.0.0.1", &["audio"])).await);

    match err {
        SubmitError::RateLimited { retry_after } => {
            assert!(retry_after > Duration::from_secs(50));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Another client is unaffected.
    assert_ok!(h.orchestrator.submit(request("10.0.0.2", &["video"])).await);
    h.orchestrator.drain().await;

    assert_eq!(h.registry.count(&JobFilter::new()).unwrap(), 2);
    assert_eq!(h.orchestrator.status().active_jobs, 0);
}

#[tokio::test]
async fn test_session_rate_limit_fails_job_mid_flight() {
    let h = harness_with(|c| c.rate_limit.session_interval_secs = 60);

    let mut first = request("10.0.0.1", &["video"]);
    first.session_key = Some("session-a".to_string());
    let mut second = request("10.0.0.2", &["video"]);
    second.session_key = Some("session-a".to_string());

    let first = run_to_end(&h, first).await;
    let second = run_to_end(&h, second).await;

    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Failed);
    assert_eq!(second.error_type, Some(ErrorType::RateLimited));
    assert!(second.started_at.is_some());
    assert_eq!(h.runner.calls().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_admission() {
    let h = harness_with(|c| c.admission.max_active_jobs = 1);

    let mut missing = request("10.0.0.1", &["video"]);
    missing.url = "   ".to_string();
    assert_eq!(
        h.orchestrator.submit(missing).await.unwrap_err(),
        SubmitError::MissingUrl
    );

    let mut bad_url = request("10.0.0.1", &["video"]);
    bad_url.url = "https://example.com/video.mp4".to_string();
    let err = h.orchestrator.submit(bad_url).await.unwrap_err();
    assert_eq!(err.reason(), "invalid url shape");

    let err = h
        .orchestrator
        .submit(request("10.0.0.1", &["hologram"]))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "invalid formats");
    assert_eq!(err.error_type(), ErrorType::InvalidInput);

    let err = h.orchestrator.submit(request("10.0.0.1", &[])).await.unwrap_err();
    assert_eq!(err.reason(), "invalid formats");

    assert_eq!(h.registry.count(&JobFilter::new()).unwrap(), 0);
    assert_eq!(h.orchestrator.status().active_jobs, 0);
}

#[tokio::test]
async fn test_panic_in_job_is_recorded_and_slot_released() {
    let h = harness_with(|c| c.admission.max_active_jobs = 1);
    h.runner
        .script("yt-dlp", ScriptedOutcome::Panic("engine exploded".to_string()))
        .await;

    let job = run_to_end(&h, request("10.0.0.1", &["video"])).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type, Some(ErrorType::GeneralError));
    assert!(job.error.unwrap().contains("engine exploded"));
    assert_eq!(h.orchestrator.status().active_jobs, 0);
    assert_ok!(h.orchestrator.submit(request("10.0.0.2", &["video"])).await);
    h.orchestrator.drain().await;
}

#[tokio::test]
async fn test_progress_is_monotonic_and_terminal_is_immutable() {
    let h = harness();
    h.runner.set_delay(Duration::from_millis(20)).await;

    let job = assert_ok!(
        h.orchestrator
            .submit(request("10.0.0.1", &["video", "audio", "silent_video"]))
            .await
    );

    let mut observed = Vec::new();
    loop {
        let snapshot = h.registry.get(&job.id).unwrap().unwrap();
        observed.push((snapshot.status, snapshot.progress));
        if snapshot.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.orchestrator.drain().await;

    for pair in observed.windows(2) {
        let ((s1, p1), (s2, p2)) = (pair[0], pair[1]);
        assert!(p2 >= p1, "progress went backwards: {:?}", observed);
        assert!(rank(s2) >= rank(s1), "status went backwards: {:?}", observed);
        if s1.is_terminal() {
            assert_eq!(s1, s2, "left a terminal state: {:?}", observed);
        }
    }
    for (status, progress) in &observed {
        match status {
            JobStatus::Queued => assert_eq!(*progress, 0),
            JobStatus::Processing => assert!(*progress > 0 && *progress < 100),
            JobStatus::Completed => assert_eq!(*progress, 100),
            JobStatus::Failed => {}
        }
    }

    let done = h.registry.get(&job.id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.files.len(), 3);

    // Terminal records reject further transitions.
    assert!(h.registry.update(&job.id, &mut |j| j.start()).is_err());
    assert!(h
        .registry
        .update(&job.id, &mut |j| j.fail(ErrorType::GeneralError, "late"))
        .is_err());
    assert_eq!(h.registry.get(&job.id).unwrap().unwrap(), done);
}

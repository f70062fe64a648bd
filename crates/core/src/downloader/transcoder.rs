//! Transcoding engine wrapper (ffmpeg argument conventions).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use super::config::TranscoderConfig;
use crate::metrics;
use crate::process::{CommandRunner, Invocation, ProcessError};

/// The two derivations the orchestrator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOp {
    /// Extract the audio stream of a video as mp3.
    DemuxAudio,
    /// Drop the audio stream, copying video untouched.
    StripAudio,
}

impl TranscodeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeOp::DemuxAudio => "demux_audio",
            TranscodeOp::StripAudio => "strip_audio",
        }
    }

    /// Output extension produced by this operation, given the input's extension.
    pub fn output_extension<'a>(&self, input_ext: &'a str) -> &'a str {
        match self {
            TranscodeOp::DemuxAudio => "mp3",
            TranscodeOp::StripAudio => input_ext,
        }
    }
}

/// Errors from a transcode.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("transcoder exited with code {exit_code:?}: {message}")]
    Failed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("transcoder produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Runs the transcoding engine through a [`CommandRunner`].
pub struct Transcoder {
    runner: Arc<dyn CommandRunner>,
    config: TranscoderConfig,
}

impl Transcoder {
    pub fn new(runner: Arc<dyn CommandRunner>, config: TranscoderConfig) -> Self {
        Self { runner, config }
    }

    fn build_args(op: TranscodeOp, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        match op {
            TranscodeOp::DemuxAudio => args.extend([
                "-vn".to_string(),
                "-acodec".to_string(),
                "libmp3lame".to_string(),
                "-q:a".to_string(),
                "2".to_string(),
            ]),
            TranscodeOp::StripAudio => args.extend([
                "-an".to_string(),
                "-c:v".to_string(),
                "copy".to_string(),
            ]),
        }

        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Run `op` on `input`, writing `output`. Succeeds only if the output exists afterwards.
    pub async fn transcode(
        &self,
        op: TranscodeOp,
        input: &Path,
        output: &Path,
    ) -> Result<(), TranscodeError> {
        let started = Instant::now();
        let invocation = Invocation::new(
            self.config.binary.clone(),
            Self::build_args(op, input, output),
            self.config.timeout(),
        );

        let result = self.run(&invocation, output).await;
        let label = if result.is_ok() { "success" } else { "failure" };
        metrics::TRANSCODES_TOTAL
            .with_label_values(&[op.as_str(), label])
            .inc();

        match &result {
            Ok(()) => info!(
                "{} {} -> {} in {:.1}s",
                op.as_str(),
                input.display(),
                output.display(),
                started.elapsed().as_secs_f64()
            ),
            Err(e) => {
                warn!("{} of {} failed: {}", op.as_str(), input.display(), e);
                // Never leave a half-written derivative behind.
                if let Err(e) = fs::remove_file(output).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove {}: {}", output.display(), e);
                    }
                }
            }
        }
        result
    }

    async fn run(&self, invocation: &Invocation, output: &Path) -> Result<(), TranscodeError> {
        let result = self.runner.run(invocation).await?;
        if !result.success() {
            return Err(TranscodeError::Failed {
                exit_code: result.exit_code,
                message: result.summary(),
            });
        }

        match fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscodeError::MissingOutput(output.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    #[test]
    fn test_demux_args() {
        let args = Transcoder::build_args(
            TranscodeOp::DemuxAudio,
            Path::new("/o/j_video.mp4"),
            Path::new("/o/j_audio.mp3"),
        );
        assert!(args.windows(2).any(|w| w == ["-i", "/o/j_video.mp4"]));
        assert!(args.contains(&"-vn".to_string()));
        assert!(args.windows(2).any(|w| w == ["-acodec", "libmp3lame"]));
        assert_eq!(args.last().unwrap(), "/o/j_audio.mp3");
    }

    #[test]
    fn test_strip_args() {
        let args = Transcoder::build_args(
            TranscodeOp::StripAudio,
            Path::new("/o/j_video.mp4"),
            Path::new("/o/j_silent.mp4"),
        );
        assert!(args.contains(&"-an".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:v", "copy"]));
        assert_eq!(args.last().unwrap(), "/o/j_silent.mp4");
        assert_eq!(TranscodeOp::StripAudio.output_extension("webm"), "webm");
        assert_eq!(TranscodeOp::DemuxAudio.output_extension("webm"), "mp3");
    }

    #[tokio::test]
    async fn test_transcode_success_requires_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("j_video.mp4");
        std::fs::write(&input, b"video").unwrap();
        let output = dir.path().join("j_silent.mp4");

        let runner = Arc::new(ScriptedRunner::new());
        let transcoder = Transcoder::new(runner.clone(), TranscoderConfig::default());
        transcoder
            .transcode(TranscodeOp::StripAudio, &input, &output)
            .await
            .unwrap();

        assert!(output.exists());
        assert_eq!(runner.calls_for("ffmpeg").await.len(), 1);
    }

    #[tokio::test]
    async fn test_transcode_failure_removes_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("j_video.mp4");
        std::fs::write(&input, b"video").unwrap();
        let output = dir.path().join("j_audio.mp3");

        let runner = Arc::new(ScriptedRunner::new());
        runner
            .script_failure("ffmpeg", 1, "Invalid data found when processing input")
            .await;
        let transcoder = Transcoder::new(runner, TranscoderConfig::default());

        let err = transcoder
            .transcode(TranscodeOp::DemuxAudio, &input, &output)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Failed { exit_code: Some(1), .. }));
        assert!(!output.exists());
    }
}

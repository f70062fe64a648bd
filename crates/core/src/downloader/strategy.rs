//! Declarative extraction strategies.
//!
//! A strategy is one way of asking the extractor for an artifact: which
//! client identity to impersonate, which format selector to use, and any
//! extra arguments. The cascade walks an ordered list of them.

use std::time::Duration;

use super::config::ExtractorConfig;
use crate::job::MediaFormat;

/// One extraction attempt descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    /// Label used in logs and metrics.
    pub name: String,
    /// Player client identity passed through `--extractor-args`.
    pub client: String,
    /// Value of `-f`.
    pub format_selector: String,
    /// Appended after the common arguments.
    pub extra_args: Vec<String>,
    /// Artifact extensions accepted as success, in preference order.
    pub extensions: Vec<String>,
    /// Overrides the extractor's default timeout.
    pub timeout: Option<Duration>,
}

impl Strategy {
    pub fn new(
        name: impl Into<String>,
        client: impl Into<String>,
        format_selector: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client: client.into(),
            format_selector: format_selector.into(),
            extra_args: Vec::new(),
            extensions: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.extra_args.extend(args.iter().map(|a| a.to_string()));
        self
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective timeout for this attempt.
    pub fn timeout_or(&self, config: &ExtractorConfig) -> Duration {
        self.timeout.unwrap_or_else(|| config.timeout())
    }

    /// Build the extractor argument list. The URL is always last.
    pub fn build_args(
        &self,
        url: &str,
        output_template: &str,
        proxy: Option<&str>,
        config: &ExtractorConfig,
    ) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.format_selector.clone(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--no-progress".to_string(),
            "--no-update".to_string(),
            "--socket-timeout".to_string(),
            config.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            config.retries.to_string(),
            "--sleep-requests".to_string(),
            config.sleep_requests_secs.to_string(),
            "--user-agent".to_string(),
            config.user_agent.clone(),
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", self.client),
            "-o".to_string(),
            output_template.to_string(),
        ];

        args.extend(self.extra_args.iter().cloned());

        if let Some(proxy) = proxy {
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }

        args.push(url.to_string());
        args
    }
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3"];

/// Ordered strategy lists per extractor-produced format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySet {
    pub video: Vec<Strategy>,
    pub audio: Vec<Strategy>,
}

impl StrategySet {
    /// Strategies for `format`. Silent video is derived by the transcoder and has none.
    pub fn for_format(&self, format: MediaFormat) -> &[Strategy] {
        match format {
            MediaFormat::Video => &self.video,
            MediaFormat::Audio => &self.audio,
            MediaFormat::SilentVideo => &[],
        }
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        let merge_mp4 = ["--merge-output-format", "mp4"];
        let to_mp3 = ["-x", "--audio-format", "mp3", "--audio-quality", "0"];

        Self {
            video: vec![
                Strategy::new(
                    "web",
                    "web",
                    "bestvideo[ext=mp4][height<=1080]+bestaudio[ext=m4a]/best[ext=mp4]/best",
                )
                .with_args(&merge_mp4)
                .with_extensions(VIDEO_EXTENSIONS),
                Strategy::new("android", "android", "best[ext=mp4]/best")
                    .with_args(&merge_mp4)
                    .with_extensions(VIDEO_EXTENSIONS),
                Strategy::new("ios", "ios", "best")
                    .with_args(&merge_mp4)
                    .with_extensions(VIDEO_EXTENSIONS),
                Strategy::new("tv_embedded", "tv_embedded", "best")
                    .with_extensions(VIDEO_EXTENSIONS),
            ],
            audio: vec![
                Strategy::new("web", "web", "bestaudio[ext=m4a]/bestaudio/best")
                    .with_args(&to_mp3)
                    .with_extensions(AUDIO_EXTENSIONS),
                Strategy::new("android", "android", "bestaudio/best")
                    .with_args(&to_mp3)
                    .with_extensions(AUDIO_EXTENSIONS),
                Strategy::new("ios", "ios", "bestaudio/best")
                    .with_args(&to_mp3)
                    .with_extensions(AUDIO_EXTENSIONS),
            ],
        }
    }
}

//! Configuration for the extraction and transcoding engines.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the yt-dlp compatible extraction engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Path to the extractor binary.
    #[serde(default = "default_extractor_binary")]
    pub binary: PathBuf,

    /// Default per-attempt timeout in seconds. Strategies may override it.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User agent passed to the engine.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Engine-level socket timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,

    /// Engine-internal retry count per attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds the engine sleeps between its own HTTP requests.
    #[serde(default = "default_sleep_requests")]
    pub sleep_requests_secs: u64,

    /// Accepted source URL shape. Requests not matching are rejected before admission.
    #[serde(default = "default_url_pattern")]
    pub url_pattern: String,
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_extractor_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_sleep_requests() -> u64 {
    1
}

pub(crate) fn default_url_pattern() -> String {
    r"^https?://((www|m|music)\.)?(youtube\.com/(watch\?([^#]*&)?v=|shorts/|embed/|live/)|youtu\.be/)[A-Za-z0-9_-]{11}([?&#].*)?$"
        .to_string()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: default_extractor_binary(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            socket_timeout_secs: default_socket_timeout(),
            retries: default_retries(),
            sleep_requests_secs: default_sleep_requests(),
            url_pattern: default_url_pattern(),
        }
    }
}

/// Configuration for the ffmpeg compatible transcoding engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to the transcoder binary.
    #[serde(default = "default_transcoder_binary")]
    pub binary: PathBuf,

    /// Timeout for a single transcode in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_transcoder_binary() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: default_transcoder_binary(),
            timeout_secs: default_timeout(),
        }
    }
}

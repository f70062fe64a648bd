//! Failure taxonomy and classification of engine output.
//!
//! Subprocess failures carry no structured error, only exit status and the
//! captured output text. [`classify_output`] maps that text onto a stable
//! [`ErrorType`] using a single ordered signature table; the first matching
//! row wins, so more specific signatures must come first.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error classification exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The source challenged the request as automated (sign-in, 403/429, CAPTCHA).
    BotDetection,
    /// The media is private, deleted or never existed.
    VideoUnavailable,
    /// The extraction engine could not parse the source.
    ExtractionError,
    /// Anything else, including transcoding failures and internal errors.
    GeneralError,
    /// Request-time rejection: malformed URL or formats.
    InvalidInput,
    /// Request-time or session pacing rejection.
    RateLimited,
    /// Request-time rejection: concurrency cap reached.
    AdmissionRejected,
}

impl ErrorType {
    /// All classifications, in a stable order.
    pub const ALL: [ErrorType; 7] = [
        ErrorType::BotDetection,
        ErrorType::VideoUnavailable,
        ErrorType::ExtractionError,
        ErrorType::GeneralError,
        ErrorType::InvalidInput,
        ErrorType::RateLimited,
        ErrorType::AdmissionRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotDetection => "bot_detection",
            Self::VideoUnavailable => "video_unavailable",
            Self::ExtractionError => "extraction_error",
            Self::GeneralError => "general_error",
            Self::InvalidInput => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::AdmissionRejected => "admission_rejected",
        }
    }

    /// Short guidance shown next to a failed job.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::BotDetection => {
                "The source is challenging automated requests. Configure egress proxies or retry later."
            }
            Self::VideoUnavailable => {
                "The video is private, deleted or does not exist. Retrying will not help."
            }
            Self::ExtractionError => {
                "The extraction engine could not read the source. Retry later or update the engine."
            }
            Self::GeneralError => "An unexpected error occurred. Retry the request.",
            Self::InvalidInput => "Check the URL and the requested formats.",
            Self::RateLimited => "Too many requests in a short time. Wait before retrying.",
            Self::AdmissionRejected => "The server is at capacity. Retry shortly.",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered (pattern, classification) table. Evaluated top to bottom.
static SIGNATURES: Lazy<Vec<(Regex, ErrorType)>> = Lazy::new(|| {
    let rows: &[(&str, ErrorType)] = &[
        (r"(?i)sign in to confirm", ErrorType::BotDetection),
        (r"(?i)not a bot", ErrorType::BotDetection),
        (
            r"(?i)(http error|status code)\s*:?\s*(403|429)\b|\b(403|429):",
            ErrorType::BotDetection,
        ),
        (r"(?i)too many requests", ErrorType::BotDetection),
        (r"(?i)captcha", ErrorType::BotDetection),
        (r"(?i)unusual traffic", ErrorType::BotDetection),
        (r"(?i)private video", ErrorType::VideoUnavailable),
        (r"(?i)video unavailable", ErrorType::VideoUnavailable),
        (r"(?i)has been removed", ErrorType::VideoUnavailable),
        (r"(?i)does not exist", ErrorType::VideoUnavailable),
        (r"(?i)account .*terminated", ErrorType::VideoUnavailable),
        (r"(?i)unable to extract", ErrorType::ExtractionError),
        (r"(?i)unsupported url", ErrorType::ExtractionError),
        (r"(?i)no video formats found", ErrorType::ExtractionError),
        (r"(?i)requested format is not available", ErrorType::ExtractionError),
        (r"(?i)unable to download (webpage|video data|api page)", ErrorType::ExtractionError),
        (r"(?i)extractor ?error", ErrorType::ExtractionError),
    ];

    rows.iter()
        .map(|(pattern, kind)| (Regex::new(pattern).expect("signature pattern"), *kind))
        .collect()
});

/// Classify the combined stdout/stderr text of a failed engine invocation.
pub fn classify_output(output: &str) -> ErrorType {
    SIGNATURES
        .iter()
        .find(|(re, _)| re.is_match(output))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorType::GeneralError)
}

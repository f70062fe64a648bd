//! Testing utilities.
//!
//! [`ScriptedRunner`] stands in for the external engines so the strategy
//! cascade and the orchestrator can be driven end-to-end without yt-dlp or
//! ffmpeg installed.

mod scripted_runner;

pub use scripted_runner::{ScriptedOutcome, ScriptedRunner};

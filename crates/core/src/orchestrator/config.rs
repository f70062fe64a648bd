//! Pacing configuration for the job orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::downloader::Backoff;

/// Stealth delays inserted between engine invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Base pause between two formats of the same job (milliseconds).
    #[serde(default = "default_format_delay")]
    pub format_delay_ms: u64,

    /// Random extra pause between formats, uniform in `0..=format_jitter_ms`.
    #[serde(default = "default_format_jitter")]
    pub format_jitter_ms: u64,

    /// Base pause between strategy attempts; doubles per failed attempt.
    #[serde(default = "default_strategy_delay")]
    pub strategy_delay_ms: u64,

    /// Random extra pause between strategy attempts.
    #[serde(default = "default_strategy_jitter")]
    pub strategy_jitter_ms: u64,
}

impl PacingConfig {
    /// No pauses at all. Used by tests.
    pub fn immediate() -> Self {
        Self {
            format_delay_ms: 0,
            format_jitter_ms: 0,
            strategy_delay_ms: 0,
            strategy_jitter_ms: 0,
        }
    }

    pub fn format_delay(&self) -> Duration {
        Duration::from_millis(self.format_delay_ms)
    }

    pub fn format_jitter(&self) -> Duration {
        Duration::from_millis(self.format_jitter_ms)
    }

    pub fn strategy_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.strategy_delay_ms),
            Duration::from_millis(self.strategy_jitter_ms),
        )
    }
}

fn default_format_delay() -> u64 {
    3000
}

fn default_format_jitter() -> u64 {
    2000
}

fn default_strategy_delay() -> u64 {
    2000
}

fn default_strategy_jitter() -> u64 {
    1500
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            format_delay_ms: default_format_delay(),
            format_jitter_ms: default_format_jitter(),
            strategy_delay_ms: default_strategy_delay(),
            strategy_jitter_ms: default_strategy_jitter(),
        }
    }
}

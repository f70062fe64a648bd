//! Minimum-interval rate limiter keyed by client or session.
//!
//! Unlike a token bucket there is no burst allowance: a key may make one
//! accepted request per interval. Rejected calls leave the recorded
//! timestamp untouched, so a client hammering the endpoint does not extend
//! its own penalty.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Per-key minimum interval limiter.
///
/// Thread-safe and async-compatible.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: RwLock<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Create a limiter that accepts at most one request per `min_interval` per key.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: RwLock::new(HashMap::new()),
        }
    }

    /// Accept and record a request for `key`.
    ///
    /// Returns `Ok(())` if the interval has elapsed (or the key is new).
    /// Returns `Err(wait)` with the remaining time otherwise; nothing is recorded.
    pub async fn check_and_record(&self, key: &str) -> Result<(), Duration> {
        let mut last_accepted = self.last_accepted.write().await;
        let now = Instant::now();

        if let Some(last) = last_accepted.get(key) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.min_interval {
                return Err(self.min_interval - elapsed);
            }
        }

        last_accepted.insert(key.to_string(), now);
        Ok(())
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.last_accepted.read().await.len()
    }
}

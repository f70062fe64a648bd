//! Least-recently-used rotation over a static pool of egress proxies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct ProxyEntry {
    url: String,
    /// Logical use order; `None` means never used.
    last_used_seq: Option<u64>,
    last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Pool {
    entries: Vec<ProxyEntry>,
    next_seq: u64,
}

/// Public view of a pool entry (credentials redacted).
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub url: String,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Selects the least recently used proxy for each engine invocation.
///
/// An empty pool is valid: [`ProxyRotator::next_proxy`] returns `None` and callers
/// run without a proxy.
#[derive(Debug)]
pub struct ProxyRotator {
    pool: Mutex<Pool>,
}

impl ProxyRotator {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = urls
            .into_iter()
            .map(Into::<String>::into)
            .filter(|u| !u.trim().is_empty())
            .map(|url| ProxyEntry {
                url,
                last_used_seq: None,
                last_used_at: None,
            })
            .collect();

        Self {
            pool: Mutex::new(Pool {
                entries,
                next_seq: 0,
            }),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Take the least recently used proxy and mark it used now.
    pub fn next_proxy(&self) -> Option<String> {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        let seq = pool.next_seq;

        // `None` orders before any `Some`, so unused entries go first.
        let entry = pool.entries.iter_mut().min_by_key(|e| e.last_used_seq)?;
        entry.last_used_seq = Some(seq);
        entry.last_used_at = Some(Utc::now());
        let url = entry.url.clone();

        pool.next_seq += 1;
        debug!("Selected proxy {}", redact_proxy_url(&url));
        Some(url)
    }

    pub fn len(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> Vec<ProxyStatus> {
        let pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.entries
            .iter()
            .map(|e| ProxyStatus {
                url: redact_proxy_url(&e.url),
                last_used_at: e.last_used_at,
            })
            .collect()
    }
}

/// Strip `user:pass@` from a proxy URL for display.
pub fn redact_proxy_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let host = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    match scheme {
        Some(scheme) => format!("{}://{}", scheme, host),
        None => host.to_string(),
    }
}

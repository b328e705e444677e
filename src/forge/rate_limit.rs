//! Remote API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the IETF
//! `RateLimit-*` names) from every response and pauses before the next call
//! once the remaining budget drops under the configured buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

/// Longest pause we are willing to take before a request.
const MAX_PAUSE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// `u64::MAX` until the first response carrying the header.
    remaining: Arc<AtomicU64>,
    /// Unix seconds at which the window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Remaining calls, or `None` before any response has been observed.
    pub fn remaining(&self) -> Option<u64> {
        match self.remaining.load(Ordering::Relaxed) {
            u64::MAX => None,
            n => Some(n),
        }
    }

    pub fn observe(&self, headers: &reqwest::header::HeaderMap) {
        let read = |primary: &str, fallback: &str| {
            headers
                .get(primary)
                .or_else(|| headers.get(fallback))
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        if let Some(remaining) = read("X-RateLimit-Remaining", "RateLimit-Remaining") {
            self.remaining.store(remaining, Ordering::Relaxed);
        }
        if let Some(reset) = read("X-RateLimit-Reset", "RateLimit-Reset") {
            self.reset_at.store(reset, Ordering::Relaxed);
        }
    }

    /// How long to wait before the next call, given the current unix time.
    pub fn pause_needed(&self, buffer: u32, now_secs: u64) -> Option<Duration> {
        let remaining = self.remaining()?;
        if remaining >= u64::from(buffer) {
            return None;
        }
        let reset = self.reset_at.load(Ordering::Relaxed);
        if reset <= now_secs {
            return None;
        }
        Some(Duration::from_secs(reset - now_secs).min(MAX_PAUSE))
    }

    /// Sleep if the budget is nearly exhausted. Returns `true` if it slept.
    pub async fn throttle(&self, buffer: u32) -> bool {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        match self.pause_needed(buffer, now) {
            Some(pause) => {
                warn!(
                    remaining = self.remaining(),
                    pause_secs = pause.as_secs(),
                    buffer,
                    "remote rate limit nearly exhausted, pausing"
                );
                tokio::time::sleep(pause).await;
                true
            }
            None => {
                debug!(remaining = self.remaining(), buffer, "rate limit OK");
                false
            }
        }
    }
}

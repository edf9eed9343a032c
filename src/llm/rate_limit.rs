//! Per-key request rate limiting for LLM calls.
//!
//! One limiter is built per service instance and handed to every reviewer;
//! keys are model names, so a busy model does not starve another.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{DefaultKeyedRateLimiter, Jitter, Quota, RateLimiter as Governor};

/// Keyed limiter allowing `requests_per_minute` per key, with a burst of the
/// same size.
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    jitter: Jitter,
    requests_per_minute: NonZeroU32,
}

impl RateLimiter {
    pub fn new(requests_per_minute: NonZeroU32) -> Self {
        Self {
            limiter: Governor::keyed(Quota::per_minute(requests_per_minute)),
            jitter: Jitter::new(Duration::from_millis(10), Duration::from_millis(100)),
            requests_per_minute,
        }
    }

    /// `None` for a zero rate.
    pub fn per_minute(requests: u32) -> Option<Self> {
        NonZeroU32::new(requests).map(Self::new)
    }

    /// Replaces the random delay added after waiting.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute.get()
    }

    /// Waits until `key` may make a request; returns the time spent waiting.
    pub async fn acquire(&self, key: &str) -> Duration {
        let key = key.to_string();
        if self.limiter.check_key(&key).is_ok() {
            return Duration::ZERO;
        }

        let started = Instant::now();
        self.limiter
            .until_key_ready_with_jitter(&key, self.jitter)
            .await;
        let waited = started.elapsed();
        tracing::debug!(key = %key, waited_ms = waited.as_millis() as u64, "Rate limited LLM request");
        waited
    }

    /// Takes a slot for `key` without waiting.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Number of keys with state.
    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }

    /// Forgets keys whose window has fully refilled.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests_per_minute", &self.requests_per_minute)
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

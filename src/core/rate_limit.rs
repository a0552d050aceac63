// src/core/rate_limit.rs

//! A tiny one-gate-per-call-site rate limiter for the router's "never storm
//! the log" warnings (all-candidates-refused, server-not-found).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Gates repeated log lines to at most once per `interval`, independent of
/// the shard's own `RwLock` so a read-only `submit` call never needs the
/// write lock just to log.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    epoch: Instant,
    last_fired_millis: AtomicU64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            epoch: Instant::now(),
            // Far enough in the past that the very first call always fires.
            last_fired_millis: AtomicU64::new(0),
        }
    }

    /// Returns `true` at most once per `interval`.
    pub fn allow(&self) -> bool {
        let now_millis = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_fired_millis.load(Ordering::Relaxed);
        if now_millis.saturating_sub(last) < self.interval.as_millis() as u64 {
            return false;
        }
        self.last_fired_millis
            .compare_exchange(last, now_millis, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_then_gates() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert!(!limiter.allow());
    }
}

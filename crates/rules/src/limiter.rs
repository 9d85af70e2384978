//! Per-rule token buckets gating registry writes.
//!
//! Each rule UID gets an independent bucket that starts full and regains
//! one token per refill interval. A write that finds its bucket empty is
//! refused; callers drop it instead of waiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use meterdef_core::RateLimitConfig;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_interval: Duration, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = elapsed.as_secs_f64() / refill_interval.as_secs_f64();
        self.tokens = (self.tokens + earned).min(capacity);
        self.last_refill = now;
    }
}

pub struct IngestRateLimiter {
    capacity: f64,
    refill_interval: Duration,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl IngestRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity.max(1) as f64,
            refill_interval: if config.refill_interval.is_zero() {
                Duration::from_secs(5)
            } else {
                config.refill_interval
            },
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `uid`, creating its bucket on first use.
    pub fn allow(&self, uid: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = buckets
            .entry(uid.to_string())
            .or_insert_with(|| TokenBucket::full(self.capacity, now));

        bucket.refill(self.capacity, self.refill_interval, now);
        bucket.last_seen = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop the bucket for `uid`. Returns whether one existed.
    pub fn forget(&self, uid: &str) -> bool {
        self.buckets
            .lock()
            .expect("rate limiter lock poisoned")
            .remove(uid)
            .is_some()
    }

    /// Remove buckets not used for at least `ttl`.
    ///
    /// Bounds the map when rule deletions are missed. An evicted bucket is
    /// recreated full on next use, which is what it would have refilled to.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_seen) < ttl);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = buckets.len(), "evicted idle rate limiter buckets");
        }
        evicted
    }

    /// Tokens currently available to `uid`, if it has a bucket.
    pub fn available(&self, uid: &str) -> Option<f64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        buckets.get_mut(uid).map(|b| {
            b.refill(self.capacity, self.refill_interval, now);
            b.tokens
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().expect("rate limiter lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> IngestRateLimiter {
        IngestRateLimiter::new(&RateLimitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_rapid_call_is_refused() {
        let limiter = limiter();
        let admitted = (0..11).filter(|_| limiter.allow("uid-1")).count();
        assert_eq!(admitted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_independent() {
        let limiter = limiter();
        for _ in 0..10 {
            assert!(limiter.allow("uid-1"));
        }
        assert!(!limiter.allow("uid-1"));
        assert!(limiter.allow("uid-2"));
        assert_eq!(limiter.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn one_token_returns_per_refill_interval() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.allow("uid-1");
        }
        assert!(!limiter.allow("uid-1"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.allow("uid-1"));
        assert!(!limiter.allow("uid-1"));

        tokio::time::advance(Duration::from_secs(600)).await;
        let refilled = limiter.available("uid-1").unwrap();
        assert!((refilled - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_resets_bucket() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.allow("uid-1");
        }
        assert!(limiter.forget("uid-1"));
        assert!(!limiter.forget("uid-1"));
        assert!(limiter.allow("uid-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_drops_only_stale_buckets() {
        let limiter = limiter();
        limiter.allow("old");
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.allow("fresh");

        assert_eq!(limiter.evict_idle(Duration::from_secs(60)), 1);
        assert!(limiter.available("old").is_none());
        assert!(limiter.available("fresh").is_some());
    }
}

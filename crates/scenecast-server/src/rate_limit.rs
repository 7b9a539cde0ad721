//! Token bucket rate limiting keyed by caller identity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny,
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        self == RateDecision::Allow
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token buckets. Each key starts full and refills continuously at
/// `refill_per_sec`, capped at `capacity`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec: if refill_per_sec > 0.0 { refill_per_sec } else { 1.0 },
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        // The entry holds the shard lock, so concurrent checks on one key serialize.
        match self.buckets.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Bucket {
                    tokens: self.capacity - 1.0,
                    last_refill: now,
                });
                RateDecision::Allow
            }
            Entry::Occupied(mut slot) => {
                let bucket = slot.get_mut();
                let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    RateDecision::Allow
                } else {
                    RateDecision::Deny
                }
            }
        }
    }

    /// Time after which an untouched bucket is back to full.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.capacity / self.refill_per_sec)
    }

    /// Drop buckets idle long enough to have refilled completely. A fresh
    /// bucket behaves identically, so callers cannot observe the eviction.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let threshold = self.idle_threshold();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < threshold);
        before.saturating_sub(self.buckets.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.evict_idle(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, remaining = self.bucket_count(), "evicted idle rate buckets");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_two_allows_two_then_denies() {
        let limiter = RateLimiter::new(2, 1.0);
        let start = Instant::now();

        let decisions: Vec<_> = (0..3).map(|_| limiter.check_at("k", start)).collect();
        assert_eq!(
            decisions,
            vec![RateDecision::Allow, RateDecision::Allow, RateDecision::Deny]
        );

        let later = start + Duration::from_millis(1000);
        assert_eq!(limiter.check_at("k", later), RateDecision::Allow);
        assert_eq!(limiter.check_at("k", later), RateDecision::Deny);
    }

    #[tokio::test]
    async fn test_refills_after_real_sleep() {
        let limiter = RateLimiter::new(2, 1.0);
        assert!(limiter.check("k").is_allowed());
        assert!(limiter.check("k").is_allowed());
        assert!(!limiter.check("k").is_allowed());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.check("k").is_allowed());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 1.0);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_allowed());
        assert!(!limiter.check_at("a", now).is_allowed());
        assert!(limiter.check_at("b", now).is_allowed());
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let limiter = RateLimiter::new(3, 1.0);
        let start = Instant::now();
        limiter.check_at("k", start);

        let much_later = start + Duration::from_secs(3600);
        let allowed = (0..5)
            .filter(|_| limiter.check_at("k", much_later).is_allowed())
            .count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn test_evict_idle_only_removes_full_buckets() {
        let limiter = RateLimiter::new(2, 1.0);
        let start = Instant::now();
        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(5));

        assert_eq!(limiter.evict_idle(start + Duration::from_secs(6)), 1);
        assert_eq!(limiter.bucket_count(), 1);

        // A re-created bucket starts full, same as the evicted one would be.
        let now = start + Duration::from_secs(6);
        assert!(limiter.check_at("old", now).is_allowed());
        assert!(limiter.check_at("old", now).is_allowed());
        assert!(!limiter.check_at("old", now).is_allowed());
    }

    #[test]
    fn test_concurrent_checks_never_overspend() {
        let limiter = Arc::new(RateLimiter::new(50, 0.001));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..20).filter(|_| limiter.check("shared").is_allowed()).count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(allowed <= 51, "allowed {}", allowed);
        assert!(allowed >= 50);
    }
}

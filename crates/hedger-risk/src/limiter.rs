//! Token bucket rate limiting for costly recovery actions.
//!
//! One bucket per market. Buckets start full and refill continuously at
//! `refill_per_minute`, never above `capacity`.

use hedger_core::MarketSlug;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

/// Per-market token bucket.
pub struct TokenBucketLimiter {
    name: &'static str,
    capacity: f64,
    refill_per_ms: f64,
    buckets: Mutex<HashMap<MarketSlug, Bucket>>,
}

impl TokenBucketLimiter {
    /// Create a limiter.
    ///
    /// A zero capacity is raised to 1. A non-positive refill rate falls back
    /// to `capacity` per minute.
    pub fn new(name: &'static str, capacity: u32, refill_per_minute: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        let refill_per_minute = if refill_per_minute > 0.0 {
            refill_per_minute
        } else {
            capacity
        };
        Self {
            name,
            capacity,
            refill_per_ms: refill_per_minute / MS_PER_MINUTE,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Try to debit `cost` tokens for `market`.
    ///
    /// A non-positive cost counts as 1. On denial the balance is left as
    /// refilled, nothing is debited.
    pub fn allow(&self, market: &MarketSlug, cost: f64, now_ms: u64) -> bool {
        let cost = if cost > 0.0 { cost } else { 1.0 };
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(market.clone()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill_ms: now_ms,
        });
        self.refill(bucket, now_ms);

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            debug!(
                limiter = self.name,
                market = %market,
                tokens = bucket.tokens,
                cost,
                "rate limit denied"
            );
            false
        }
    }

    /// Tokens currently available for `market` (full if never used).
    pub fn available(&self, market: &MarketSlug, now_ms: u64) -> f64 {
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(market) {
            Some(bucket) => {
                self.refill(bucket, now_ms);
                bucket.tokens
            }
            None => self.capacity,
        }
    }

    /// Forget all buckets.
    pub fn reset(&self) {
        self.buckets.lock().clear();
    }

    fn refill(&self, bucket: &mut Bucket, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(bucket.last_refill_ms);
        if elapsed > 0 {
            bucket.tokens =
                (bucket.tokens + elapsed as f64 * self.refill_per_ms).min(self.capacity);
            bucket.last_refill_ms = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> MarketSlug {
        MarketSlug::from("btc-updown-15m-1")
    }

    #[test]
    fn test_burst_up_to_capacity() {
        let limiter = TokenBucketLimiter::new("reorder", 3, 3.0);
        let m = market();
        assert!(limiter.allow(&m, 1.0, 0));
        assert!(limiter.allow(&m, 1.0, 0));
        assert!(limiter.allow(&m, 1.0, 0));
        assert!(!limiter.allow(&m, 1.0, 0));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = TokenBucketLimiter::new("forced_fill", 10, 10.0);
        let m = market();
        for _ in 0..10 {
            assert!(limiter.allow(&m, 1.0, 0));
        }
        assert!(!limiter.allow(&m, 1.0, 5_900));
        // 10/min refills one token every 6 seconds.
        assert!(limiter.allow(&m, 1.0, 6_100));
        assert!(!limiter.allow(&m, 1.0, 6_100));
    }

    #[test]
    fn test_markets_are_independent() {
        let limiter = TokenBucketLimiter::new("reorder", 1, 1.0);
        assert!(limiter.allow(&MarketSlug::from("a"), 1.0, 0));
        assert!(!limiter.allow(&MarketSlug::from("a"), 1.0, 0));
        assert!(limiter.allow(&MarketSlug::from("b"), 1.0, 0));
    }

    #[test]
    fn test_degenerate_parameters() {
        let limiter = TokenBucketLimiter::new("reorder", 0, 0.0);
        assert_eq!(limiter.capacity(), 1.0);
        let m = market();
        // Non-positive cost counts as one token.
        assert!(limiter.allow(&m, 0.0, 0));
        assert!(!limiter.allow(&m, -3.0, 0));
        // Refill falls back to capacity per minute.
        assert!(limiter.allow(&m, 1.0, 61_000));
    }

    #[test]
    fn test_denial_does_not_debit() {
        let limiter = TokenBucketLimiter::new("reorder", 2, 2.0);
        let m = market();
        assert!(limiter.allow(&m, 1.0, 0));
        assert!(!limiter.allow(&m, 5.0, 0));
        assert!((limiter.available(&m, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_minute_bound() {
        // Debits within any 60s window never exceed capacity + refill.
        let limiter = TokenBucketLimiter::new("reorder", 30, 30.0);
        let m = market();
        let mut allowed_at = Vec::new();
        let mut now = 0;
        while now <= 180_000 {
            if limiter.allow(&m, 1.0, now) {
                allowed_at.push(now);
            }
            now += 100;
        }
        for (i, &start) in allowed_at.iter().enumerate() {
            let in_window = allowed_at[i..]
                .iter()
                .take_while(|&&t| t < start + 60_000)
                .count();
            assert!(in_window <= 60, "window at {start} had {in_window}");
        }
    }
}

//! Bearer token checks and per-token rate limiting.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::protocol::RpcError;

/// Key used for rate limiting callers when no tokens are configured.
const ANONYMOUS: &str = "";

/// Buckets untouched for this long are dropped.
const BUCKET_IDLE: Duration = Duration::from_secs(3600);

/// Minimum time between two idle-bucket sweeps.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per caller.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<String, Bucket>,
    last_prune: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            buckets: DashMap::new(),
            last_prune: Mutex::new(Instant::now()),
        }
    }

    /// Take one token for `key`. Returns false when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        self.maybe_prune(now);

        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn maybe_prune(&self, now: Instant) {
        {
            let mut last = self.last_prune.lock().unwrap_or_else(|e| e.into_inner());
            if now.saturating_duration_since(*last) < PRUNE_INTERVAL {
                return;
            }
            *last = now;
        }
        let pruned = self.prune_idle_at(now);
        if pruned > 0 {
            log::debug!("Dropped {} idle rate limit buckets", pruned);
        }
    }

    /// Drop buckets idle for at least [`BUCKET_IDLE`], returning how many.
    fn prune_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < BUCKET_IDLE);
        before.saturating_sub(self.buckets.len())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Decides whether a request may proceed.
pub struct AccessControl {
    tokens: Vec<String>,
    limiter: RateLimiter,
}

impl AccessControl {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            tokens: config.tokens.clone(),
            limiter: RateLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_refill_per_sec,
            ),
        }
    }

    /// True when at least one token is configured.
    pub fn requires_token(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Check the caller's token, then charge its rate limit if `limited`.
    ///
    /// Without configured tokens every caller shares one bucket, whatever
    /// token it sends.
    pub fn check(&self, token: Option<&str>, limited: bool) -> Result<(), RpcError> {
        let key = if self.requires_token() {
            let Some(token) = token else {
                return Err(RpcError::unauthorized("missing auth token"));
            };
            // Every configured token is compared, matched or not.
            let valid = self.tokens.iter().fold(0u8, |ok, t| {
                ok | t.as_bytes().ct_eq(token.as_bytes()).unwrap_u8()
            });
            if valid == 0 {
                return Err(RpcError::unauthorized("invalid auth token"));
            }
            token
        } else {
            ANONYMOUS
        };

        if limited && !self.limiter.try_acquire(key) {
            return Err(RpcError::rate_limited("rate limit exceeded, retry later"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(tokens: &[&str], capacity: u32, refill: f64) -> AccessControl {
        AccessControl::new(&AuthConfig {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            rate_limit_capacity: capacity,
            rate_limit_refill_per_sec: refill,
        })
    }

    #[test]
    fn open_access_without_configured_tokens() {
        let auth = auth(&[], 10, 1.0);
        assert!(!auth.requires_token());
        assert!(auth.check(None, true).is_ok());
        assert!(auth.check(Some("anything"), true).is_ok());
    }

    #[test]
    fn tokens_are_checked_when_configured() {
        let auth = auth(&["one", "two"], 10, 1.0);

        assert!(auth.check(Some("two"), true).is_ok());
        assert!(auth.check(Some("one"), true).is_ok());
        let missing = auth.check(None, false).unwrap_err();
        assert_eq!(missing.code, RpcError::UNAUTHORIZED);
        let wrong = auth.check(Some("three"), false).unwrap_err();
        assert_eq!(wrong.code, RpcError::UNAUTHORIZED);
        let prefix = auth.check(Some("tw"), false).unwrap_err();
        assert_eq!(prefix.code, RpcError::UNAUTHORIZED);
    }

    #[test]
    fn unchecked_tokens_share_the_anonymous_bucket() {
        let auth = auth(&[], 1, 0.0);
        assert!(auth.check(None, true).is_ok());

        let passed = (0..1000)
            .filter(|i| auth.check(Some(&format!("junk-{}", i)), true).is_ok())
            .count();
        assert_eq!(passed, 0);
        assert_eq!(auth.limiter.len(), 1);
    }

    #[test]
    fn bucket_empties_and_refills() {
        let limiter = RateLimiter::new(2, 1.0);
        let start = Instant::now();

        assert!(limiter.try_acquire_at("k", start));
        assert!(limiter.try_acquire_at("k", start));
        assert!(!limiter.try_acquire_at("k", start));

        assert!(limiter.try_acquire_at("k", start + Duration::from_millis(1100)));
        assert!(!limiter.try_acquire_at("k", start + Duration::from_millis(1200)));
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let limiter = RateLimiter::new(2, 100.0);
        let start = Instant::now();
        assert!(limiter.try_acquire_at("k", start));

        let later = start + Duration::from_secs(60);
        assert!(limiter.try_acquire_at("k", later));
        assert!(limiter.try_acquire_at("k", later));
        assert!(!limiter.try_acquire_at("k", later));
    }

    #[test]
    fn buckets_are_per_token() {
        let limiter = RateLimiter::new(1, 0.0);
        let now = Instant::now();
        assert!(limiter.try_acquire_at("a", now));
        assert!(!limiter.try_acquire_at("a", now));
        assert!(limiter.try_acquire_at("b", now));
    }

    #[test]
    fn idle_buckets_are_pruned() {
        let limiter = RateLimiter::new(1, 0.0);
        let start = Instant::now();
        assert!(limiter.try_acquire_at("old", start));
        assert!(limiter.try_acquire_at("recent", start + BUCKET_IDLE / 2));
        assert_eq!(limiter.len(), 2);

        // The sweep runs on the next acquisition once the interval has passed.
        assert!(limiter.try_acquire_at("new", start + BUCKET_IDLE));
        assert_eq!(limiter.len(), 2);
        assert!(limiter.try_acquire_at("old", start + BUCKET_IDLE));
        assert!(!limiter.try_acquire_at("recent", start + BUCKET_IDLE));
    }

    #[test]
    fn unlimited_requests_skip_the_bucket() {
        let auth = auth(&[], 1, 0.0);
        assert!(auth.check(None, true).is_ok());
        assert_eq!(auth.check(None, true).unwrap_err().code, RpcError::RATE_LIMITED);
        assert!(auth.check(None, false).is_ok());
    }
}

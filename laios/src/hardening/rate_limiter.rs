//! Token-bucket rate limiter with per-key buckets and an optional global
//! bucket.
//!
//! Each key owns a bucket of capacity `C` refilled at `R` tokens/second.
//! [`RateLimiter::check`] refills by elapsed time, clamps to capacity, and
//! consumes one token — or rejects with
//! [`Error::RateLimitExceeded`](crate::Error::RateLimitExceeded). The
//! global bucket, when configured, is charged on top of the per-key one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// Key used for the global bucket in errors and resets.
pub const GLOBAL_KEY: &str = "Global";

struct Bucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64, rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = Instant::now();
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct LimiterState {
    buckets: HashMap<String, Bucket>,
    global: Option<Bucket>,
}

/// Per-key token-bucket rate limiter.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    ///
    /// The global bucket exists only when both `global_rate` and
    /// `global_capacity` are set.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let global = match (config.global_rate, config.global_capacity) {
            (Some(rate), Some(capacity)) => Some(Bucket::full(capacity, rate)),
            _ => None,
        };
        Self {
            rate: config.rate,
            capacity: config.capacity,
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                global,
            }),
        }
    }

    /// Consume one token for `key`.
    ///
    /// Concurrent checks on the same key serialize on the bucket map lock.
    ///
    /// # Errors
    ///
    /// [`Error::RateLimitExceeded`] naming the exhausted key, or
    /// [`GLOBAL_KEY`] when the global bucket is exhausted.
    pub fn check(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");

        let bucket = state
            .buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket::full(self.capacity, self.rate));
        if !bucket.try_consume() {
            return Err(Error::RateLimitExceeded(key.to_owned()));
        }

        if let Some(ref mut global) = state.global
            && !global.try_consume()
        {
            // Refund the per-key token: the call never happened.
            if let Some(bucket) = state.buckets.get_mut(key) {
                bucket.tokens = (bucket.tokens + 1.0).min(bucket.capacity);
            }
            return Err(Error::RateLimitExceeded(GLOBAL_KEY.to_owned()));
        }
        Ok(())
    }

    /// Refill one key's bucket completely.
    pub fn reset(&self, key: &str) {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        if key == GLOBAL_KEY {
            if let Some(ref mut global) = state.global {
                global.tokens = global.capacity;
                global.last_refill = Instant::now();
            }
        } else if let Some(bucket) = state.buckets.get_mut(key) {
            bucket.tokens = bucket.capacity;
            bucket.last_refill = Instant::now();
        }
    }

    /// Tokens currently available for `key`, after refill.
    #[must_use]
    pub fn remaining(&self, key: &str) -> f64 {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        match state.buckets.get_mut(key) {
            Some(bucket) => {
                bucket.refill();
                bucket.tokens
            }
            None => self.capacity,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .field("capacity", &self.capacity)
            .field("keys", &state.buckets.len())
            .field("global", &state.global.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: f64, capacity: f64) -> RateLimitConfig {
        RateLimitConfig {
            rate,
            capacity,
            global_rate: None,
            global_capacity: None,
        }
    }

    #[test]
    fn test_capacity_calls_then_rejection() {
        let limiter = RateLimiter::new(config(0.001, 3.0));

        for _ in 0..3 {
            limiter.check("key").expect("within capacity");
        }
        let err = limiter.check("key").expect_err("capacity + 1 rejected");
        assert!(matches!(err, Error::RateLimitExceeded(ref k) if k == "key"));
    }

    #[test]
    fn test_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(config(0.001, 1.0));

        limiter.check("a").expect("a's token");
        assert!(limiter.check("a").is_err());
        limiter.check("b").expect("b unaffected");
    }

    #[test]
    fn test_reset_refills_bucket() {
        let limiter = RateLimiter::new(config(0.001, 2.0));
        limiter.check("key").expect("first");
        limiter.check("key").expect("second");
        assert!(limiter.check("key").is_err());

        limiter.reset("key");
        limiter.check("key").expect("refilled");
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(config(1000.0, 2.0));
        limiter.check("key").expect("first");
        limiter.check("key").expect("second");

        // At 1000 tokens/sec even a tiny sleep refills past one token.
        std::thread::sleep(std::time::Duration::from_millis(10));
        limiter.check("key").expect("refilled by elapsed time");
        assert!(limiter.remaining("key") <= 2.0);
    }

    #[test]
    fn test_global_bucket_applies_on_top() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rate: 0.001,
            capacity: 10.0,
            global_rate: Some(0.001),
            global_capacity: Some(2.0),
        });

        limiter.check("a").expect("global 1");
        limiter.check("b").expect("global 2");
        let err = limiter.check("c").expect_err("global exhausted");
        assert!(matches!(err, Error::RateLimitExceeded(ref k) if k == GLOBAL_KEY));

        // The per-key token for "c" was refunded.
        assert!((limiter.remaining("c") - 10.0).abs() < 0.1);
    }
}

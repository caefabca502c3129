// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Per-client rate limiting via token buckets.
//!
//! Each client id gets a bucket holding up to `rate_per_sec` tokens, refilled
//! continuously at that rate. A publish debits one token; an empty bucket
//! drops the message with `RATE_LIMIT_EXCEEDED`. Buckets whose client has
//! been silent for a grace interval are reclaimed by the periodic sweep.

use ahash::AHashMap;
use busbar_core::UnixMillis;
use ustr::Ustr;

#[derive(Clone, Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: UnixMillis,
    last_seen: UnixMillis,
}

/// Per-client token-bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: u32,
    buckets: AHashMap<Ustr, TokenBucket>,
}

impl RateLimiter {
    /// Creates a new [`RateLimiter`] with the given per-second rate.
    ///
    /// A rate of zero disables limiting entirely.
    #[must_use]
    pub fn new(rate_per_sec: u32) -> Self {
        Self {
            rate_per_sec,
            buckets: AHashMap::new(),
        }
    }

    /// Returns the configured per-second rate.
    #[must_use]
    pub const fn rate_per_sec(&self) -> u32 {
        self.rate_per_sec
    }

    /// Returns the number of live buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Attempts to debit one token from the client's bucket.
    ///
    /// Returns `false` when the client is over its rate and the message must
    /// be dropped.
    pub fn try_acquire(&mut self, client_id: Ustr, now: UnixMillis) -> bool {
        if self.rate_per_sec == 0 {
            return true;
        }

        let capacity = f64::from(self.rate_per_sec);
        let bucket = self.buckets.entry(client_id).or_insert(TokenBucket {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        });

        let elapsed_ms = now.millis_since(bucket.last_refill);
        if elapsed_ms > 0 {
            let refill = (elapsed_ms as f64 / 1_000.0) * capacity;
            bucket.tokens = (bucket.tokens + refill).min(capacity);
            bucket.last_refill = now;
        }
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Reclaims buckets whose client has been silent since before
    /// `now - grace_ms`, returning the number removed.
    pub fn sweep(&mut self, now: UnixMillis, grace_ms: u64) -> usize {
        let cutoff = now.saturating_sub_millis(grace_ms);
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.last_seen >= cutoff);
        before - self.buckets.len()
    }

    /// Clears all buckets.
    pub fn reset(&mut self) {
        self.buckets.clear();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn client() -> Ustr {
        Ustr::from("client-1")
    }

    #[rstest]
    fn test_burst_up_to_limit_then_denied() {
        let mut limiter = RateLimiter::new(5);
        let now = UnixMillis::new(1_000);

        for _ in 0..5 {
            assert!(limiter.try_acquire(client(), now));
        }
        assert!(!limiter.try_acquire(client(), now));
    }

    #[rstest]
    fn test_refill_after_elapsed_time() {
        let mut limiter = RateLimiter::new(10);
        let start = UnixMillis::new(1_000);

        for _ in 0..10 {
            assert!(limiter.try_acquire(client(), start));
        }
        assert!(!limiter.try_acquire(client(), start));

        // 100ms at 10/s refills one token
        assert!(limiter.try_acquire(client(), start + 100));
        assert!(!limiter.try_acquire(client(), start + 100));
    }

    #[rstest]
    fn test_refill_caps_at_rate() {
        let mut limiter = RateLimiter::new(2);
        let start = UnixMillis::new(1_000);

        assert!(limiter.try_acquire(client(), start));

        // A long silence must not accumulate more than one second of tokens
        let later = start + 60_000;
        assert!(limiter.try_acquire(client(), later));
        assert!(limiter.try_acquire(client(), later));
        assert!(!limiter.try_acquire(client(), later));
    }

    #[rstest]
    fn test_clients_have_independent_buckets() {
        let mut limiter = RateLimiter::new(1);
        let now = UnixMillis::new(1_000);

        assert!(limiter.try_acquire(Ustr::from("a"), now));
        assert!(!limiter.try_acquire(Ustr::from("a"), now));
        assert!(limiter.try_acquire(Ustr::from("b"), now));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[rstest]
    fn test_zero_rate_is_unlimited() {
        let mut limiter = RateLimiter::new(0);
        let now = UnixMillis::new(1_000);

        for _ in 0..10_000 {
            assert!(limiter.try_acquire(client(), now));
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[rstest]
    fn test_sweep_reclaims_idle_buckets() {
        let mut limiter = RateLimiter::new(10);
        let start = UnixMillis::new(1_000);

        limiter.try_acquire(Ustr::from("idle"), start);
        limiter.try_acquire(Ustr::from("busy"), start);
        limiter.try_acquire(Ustr::from("busy"), start + 50_000);

        let removed = limiter.sweep(start + 60_000, 30_000);
        assert_eq!(removed, 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[rstest]
    fn test_sweep_keeps_recent_buckets() {
        let mut limiter = RateLimiter::new(10);
        let now = UnixMillis::new(1_000);

        limiter.try_acquire(client(), now);
        assert_eq!(limiter.sweep(now + 1_000, 30_000), 0);
        assert_eq!(limiter.bucket_count(), 1);
    }
}

//! Token bucket burst control.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::clock::Clock;
use super::store::{KeyedStore, StoreLimits};

const NANOS_PER_MINUTE: u64 = 60_000_000_000;

/// Refills one whole token every `60s / refill_per_minute`, up to `capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    nanos_per_token: u64,
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_minute: u32, now: Instant) -> Self {
        Self {
            capacity,
            nanos_per_token: NANOS_PER_MINUTE / u64::from(refill_per_minute.max(1)),
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.try_consume_n(1, now)
    }

    pub fn try_consume_n(&mut self, tokens: u32, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    pub fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        if self.tokens >= self.capacity {
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_nanos();
        let whole = elapsed / u128::from(self.nanos_per_token);
        if whole == 0 {
            return;
        }
        let refilled = (u128::from(self.tokens) + whole).min(u128::from(self.capacity)) as u32;
        self.tokens = refilled;
        if refilled >= self.capacity {
            self.last_refill = now;
        } else {
            // Keep the fractional remainder for the next refill.
            self.last_refill += Duration::from_nanos((whole as u64) * self.nanos_per_token);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstDecision {
    pub admitted: bool,
    pub remaining_tokens: u32,
}

/// Rate-limit figures surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub available_tokens: u32,
    pub burst_capacity: u32,
    pub requests_per_minute: u32,
}

/// One token bucket per admission key.
#[derive(Debug)]
pub struct BurstLimiter {
    buckets: KeyedStore<TokenBucket>,
    capacity: u32,
    refill_per_minute: u32,
    clock: Arc<dyn Clock>,
}

impl BurstLimiter {
    pub fn new(capacity: u32, refill_per_minute: u32, limits: StoreLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: KeyedStore::new(limits),
            capacity,
            refill_per_minute,
            clock,
        }
    }

    pub fn try_consume(&self, key: &str) -> BurstDecision {
        let now = self.clock.now();
        let (capacity, rate) = (self.capacity, self.refill_per_minute);
        self.buckets.with_entry(
            key,
            now,
            || TokenBucket::new(capacity, rate, now),
            |bucket| {
                let admitted = bucket.try_consume(now);
                BurstDecision {
                    admitted,
                    remaining_tokens: bucket.available(now),
                }
            },
        )
    }

    /// Tokens currently available; an unseen key has a full bucket.
    pub fn available_tokens(&self, key: &str) -> u32 {
        let now = self.clock.now();
        self.buckets
            .with_existing(key, |bucket| bucket.available(now))
            .unwrap_or(self.capacity)
    }

    pub fn info(&self, key: &str) -> RateLimitInfo {
        RateLimitInfo {
            available_tokens: self.available_tokens(key),
            burst_capacity: self.capacity,
            requests_per_minute: self.refill_per_minute,
        }
    }

    /// Forgets a key's bucket, e.g. after an administrative reset.
    pub fn clear(&self, key: &str) {
        self.buckets.remove(key);
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

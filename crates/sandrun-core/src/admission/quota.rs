//! Sliding-window hourly quota, sized by tier.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::clock::Clock;
use super::store::{KeyedStore, StoreLimits};
use crate::model::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub admitted: bool,
    pub remaining: u32,
}

/// Timestamps of admitted requests inside the trailing window, oldest first.
#[derive(Debug, Default, Clone)]
struct QuotaWindow {
    admitted_at: VecDeque<Instant>,
}

impl QuotaWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admitted_at.front() {
            if now.saturating_duration_since(oldest) > window {
                self.admitted_at.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> u32 {
        self.admitted_at.len() as u32
    }
}

#[derive(Debug)]
pub struct QuotaLimiter {
    windows: KeyedStore<QuotaWindow>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl QuotaLimiter {
    pub fn new(window: Duration, limits: StoreLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: KeyedStore::new(limits),
            window,
            clock,
        }
    }

    /// Admits and records the request unless the key already used its quota.
    pub fn check_and_record(&self, key: &str, tier: Tier) -> QuotaDecision {
        let now = self.clock.now();
        let window = self.window;
        let limit = tier.hourly_request_limit();
        self.windows.with_entry(key, now, QuotaWindow::default, |requests| {
            requests.prune(now, window);
            if requests.count() >= limit {
                return QuotaDecision {
                    admitted: false,
                    remaining: 0,
                };
            }
            requests.admitted_at.push_back(now);
            QuotaDecision {
                admitted: true,
                remaining: limit.saturating_sub(requests.count()),
            }
        })
    }

    /// Whether the key is over quota. Records the request when it is not.
    pub fn is_rate_limited(&self, key: &str, tier: Tier) -> bool {
        !self.check_and_record(key, tier).admitted
    }

    /// Remaining requests in the current window, without recording one.
    pub fn remaining(&self, key: &str, tier: Tier) -> u32 {
        let now = self.clock.now();
        let window = self.window;
        let limit = tier.hourly_request_limit();
        self.windows
            .with_existing(key, |requests| {
                requests.prune(now, window);
                limit.saturating_sub(requests.count())
            })
            .unwrap_or(limit)
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::clock::ManualClock;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn basic_tier_gets_ten_per_hour_then_one_slot_reopens() {
        let clock = Arc::new(ManualClock::new());
        let quota = QuotaLimiter::new(HOUR, StoreLimits::default(), clock.clone());

        for i in 0..10 {
            let decision = quota.check_and_record("u1", Tier::Basic);
            assert!(decision.admitted, "request {} denied", i + 1);
            assert_eq!(decision.remaining, 9 - i);
            clock.advance(Duration::from_secs(60));
        }
        assert!(quota.is_rate_limited("u1", Tier::Basic));
        assert_eq!(quota.remaining("u1", Tier::Basic), 0);

        // First request was at t=0, the rest one minute apart after it.
        clock.advance(HOUR - Duration::from_secs(10 * 60) + Duration::from_secs(1));
        assert_eq!(quota.remaining("u1", Tier::Basic), 1);
        assert!(quota.check_and_record("u1", Tier::Basic).admitted);
        assert!(quota.is_rate_limited("u1", Tier::Basic));
    }

    #[test]
    fn denied_requests_are_not_recorded() {
        let clock = Arc::new(ManualClock::new());
        let quota = QuotaLimiter::new(HOUR, StoreLimits::default(), clock.clone());
        for _ in 0..5 {
            quota.check_and_record("anon_1.1.1.1", Tier::Anonymous);
        }
        for _ in 0..20 {
            assert!(quota.is_rate_limited("anon_1.1.1.1", Tier::Anonymous));
        }
        clock.advance(HOUR + Duration::from_secs(1));
        assert_eq!(quota.remaining("anon_1.1.1.1", Tier::Anonymous), 5);
    }

    #[test]
    fn unseen_keys_have_the_full_quota() {
        let quota = QuotaLimiter::new(HOUR, StoreLimits::default(), Arc::new(ManualClock::new()));
        assert_eq!(quota.remaining("nobody", Tier::Master), 200);
        assert_eq!(quota.tracked_keys(), 0);
    }
}

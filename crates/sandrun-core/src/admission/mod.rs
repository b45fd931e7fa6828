//! Two-gate admission control.
//!
//! - **Burst gate**: a token bucket per `user:<id>` / `ip:<addr>` key that
//!   absorbs short spikes.
//! - **Hourly quota**: a sliding one-hour window per user id / `anon_<addr>`,
//!   sized by the caller's tier.
//!
//! The gates are independent and each entry point chooses which of them it
//! goes through. Both are consulted before any execution resource is
//! allocated, and every decision reports what the caller has left.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AdmissionConfig;
use crate::errors::AdmissionDenied;
use crate::model::{CallerIdentity, Tier};

pub mod bucket;
pub mod clock;
pub mod quota;
pub mod store;

pub use bucket::{BurstDecision, BurstLimiter, RateLimitInfo, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use quota::{QuotaDecision, QuotaLimiter};
pub use store::{KeyedStore, StoreLimits};

/// Entry points that can be admission-gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Execute,
    Languages,
}

/// Which gates an entry point goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicy {
    #[serde(default = "default_true")]
    pub burst: bool,
    #[serde(default = "default_true")]
    pub quota: bool,
}

fn default_true() -> bool {
    true
}

impl EndpointPolicy {
    pub const BOTH: EndpointPolicy = EndpointPolicy {
        burst: true,
        quota: true,
    };
    pub const BURST_ONLY: EndpointPolicy = EndpointPolicy {
        burst: true,
        quota: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicies {
    #[serde(default = "default_execute_policy")]
    pub execute: EndpointPolicy,
    #[serde(default = "default_languages_policy")]
    pub languages: EndpointPolicy,
}

fn default_execute_policy() -> EndpointPolicy {
    EndpointPolicy::BOTH
}

fn default_languages_policy() -> EndpointPolicy {
    EndpointPolicy::BURST_ONLY
}

impl Default for EndpointPolicies {
    fn default() -> Self {
        Self {
            execute: default_execute_policy(),
            languages: default_languages_policy(),
        }
    }
}

impl EndpointPolicies {
    pub fn for_endpoint(&self, endpoint: Endpoint) -> EndpointPolicy {
        match endpoint {
            Endpoint::Execute => self.execute,
            Endpoint::Languages => self.languages,
        }
    }
}

/// Proof of admission, with the figures to show the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionTicket {
    pub tier: Tier,
    pub authenticated: bool,
    pub remaining_requests: u32,
    pub remaining_burst_tokens: u32,
}

#[derive(Debug)]
pub struct AdmissionController {
    burst: BurstLimiter,
    quota: QuotaLimiter,
    policies: EndpointPolicies,
}

impl AdmissionController {
    pub fn new(burst: BurstLimiter, quota: QuotaLimiter, policies: EndpointPolicies) -> Self {
        Self {
            burst,
            quota,
            policies,
        }
    }

    pub fn from_config(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        let limits = StoreLimits {
            max_entries: config.store.max_entries,
            idle_ttl: Duration::from_secs(config.store.idle_ttl_seconds),
        };
        let burst = BurstLimiter::new(
            config.burst.capacity,
            config.burst.refill_per_minute,
            limits,
            clock.clone(),
        );
        let quota = QuotaLimiter::new(
            Duration::from_secs(config.quota.window_seconds),
            limits,
            clock,
        );
        Self::new(burst, quota, config.endpoints)
    }

    pub fn burst(&self) -> &BurstLimiter {
        &self.burst
    }

    pub fn quota(&self) -> &QuotaLimiter {
        &self.quota
    }

    /// Runs the caller through the gates configured for `endpoint`, burst
    /// first. A request turned away by the burst gate is not counted against
    /// the hourly quota.
    pub fn admit(&self, endpoint: Endpoint, caller: &CallerIdentity) -> Result<AdmissionTicket, AdmissionDenied> {
        let policy = self.policies.for_endpoint(endpoint);
        let tier = caller.tier;
        let authenticated = caller.is_authenticated();
        let burst_key = caller.burst_key();
        let quota_key = caller.quota_key();

        let remaining_burst_tokens = if policy.burst {
            let decision = self.burst.try_consume(&burst_key);
            if !decision.admitted {
                log::warn!("Burst limit exceeded for client: {}", burst_key);
                return Err(AdmissionDenied::burst(
                    tier,
                    authenticated,
                    self.quota.remaining(&quota_key, tier),
                    decision.remaining_tokens,
                ));
            }
            decision.remaining_tokens
        } else {
            self.burst.available_tokens(&burst_key)
        };

        let remaining_requests = if policy.quota {
            let decision = self.quota.check_and_record(&quota_key, tier);
            if !decision.admitted {
                log::warn!("Hourly quota exceeded for key: {} (tier: {})", quota_key, tier);
                return Err(AdmissionDenied::quota(
                    tier,
                    authenticated,
                    decision.remaining,
                    remaining_burst_tokens,
                ));
            }
            decision.remaining
        } else {
            self.quota.remaining(&quota_key, tier)
        };

        Ok(AdmissionTicket {
            tier,
            authenticated,
            remaining_requests,
            remaining_burst_tokens,
        })
    }

    pub fn remaining_requests(&self, caller: &CallerIdentity) -> u32 {
        self.quota.remaining(&caller.quota_key(), caller.tier)
    }

    pub fn remaining_burst_tokens(&self, caller: &CallerIdentity) -> u32 {
        self.burst.available_tokens(&caller.burst_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Gate;

    fn controller(clock: Arc<ManualClock>, capacity: u32, policies: EndpointPolicies) -> AdmissionController {
        let burst = BurstLimiter::new(capacity, 10, StoreLimits::default(), clock.clone());
        let quota = QuotaLimiter::new(Duration::from_secs(3600), StoreLimits::default(), clock);
        AdmissionController::new(burst, quota, policies)
    }

    #[test]
    fn quota_denial_carries_remaining_figures() {
        let clock = Arc::new(ManualClock::new());
        let admission = controller(clock, 100, EndpointPolicies::default());
        let caller = CallerIdentity::authenticated("u1", Tier::Basic);

        for _ in 0..10 {
            admission.admit(Endpoint::Execute, &caller).unwrap();
        }
        let denied = admission.admit(Endpoint::Execute, &caller).unwrap_err();
        assert_eq!(denied.gate, Gate::HourlyQuota);
        assert_eq!(denied.remaining_requests, 0);
        assert_eq!(denied.remaining_burst_tokens, 89);
        assert!(denied.message.contains("Basic Plan"));
        assert!(denied.message.contains("Remaining requests this hour: 0"));
    }

    #[test]
    fn burst_denial_does_not_consume_quota() {
        let clock = Arc::new(ManualClock::new());
        let admission = controller(clock, 2, EndpointPolicies::default());
        let caller = CallerIdentity::authenticated("u1", Tier::Master);

        admission.admit(Endpoint::Execute, &caller).unwrap();
        admission.admit(Endpoint::Execute, &caller).unwrap();
        let denied = admission.admit(Endpoint::Execute, &caller).unwrap_err();
        assert_eq!(denied.gate, Gate::Burst);
        assert_eq!(denied.remaining_burst_tokens, 0);
        assert_eq!(admission.remaining_requests(&caller), 198);
    }

    #[test]
    fn anonymous_denial_suggests_signing_up() {
        let clock = Arc::new(ManualClock::new());
        let admission = controller(clock, 100, EndpointPolicies::default());
        let caller = CallerIdentity::anonymous("198.51.100.2");
        for _ in 0..5 {
            admission.admit(Endpoint::Execute, &caller).unwrap();
        }
        let denied = admission.admit(Endpoint::Execute, &caller).unwrap_err();
        assert!(!denied.authenticated);
        assert!(denied.message.contains("sign up for higher limits"));
    }

    #[test]
    fn endpoint_policy_selects_gates() {
        let clock = Arc::new(ManualClock::new());
        let admission = controller(clock, 100, EndpointPolicies::default());
        let caller = CallerIdentity::authenticated("u1", Tier::Basic);

        for _ in 0..30 {
            admission.admit(Endpoint::Languages, &caller).unwrap();
        }
        let ticket = admission.admit(Endpoint::Execute, &caller).unwrap();
        assert_eq!(ticket.remaining_requests, 9);
        assert_eq!(ticket.remaining_burst_tokens, 69);
    }
}

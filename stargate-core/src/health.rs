//! Passive (outcome-driven) health tracking: target health comes purely
//! from observing proxied requests, not a separate active prober. The
//! `DashMap`-guarded-state-with-atomic-counters idiom follows
//! `stargate-core::router`/`balancer`.

use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Healthy,
    Ejected,
}

struct TrackedTarget {
    state: TargetState,
    consec_failures: u32,
    consec_successes: u32,
    ejected_at: Option<Instant>,
}

impl Default for TrackedTarget {
    fn default() -> Self {
        Self { state: TargetState::Healthy, consec_failures: 0, consec_successes: 0, ejected_at: None }
    }
}

/// Outcome of a single proxied request against a target, as observed by the
/// proxy after a response (or failure to get one) arrives.
pub struct RequestResult {
    pub upstream_id: String,
    pub target_addr: String,
    pub status_code: Option<u16>,
    pub is_timeout: bool,
}

/// F/S/D/R passive-ejection policy:
/// - `consec_failures_threshold` (F): consecutive failures before a healthy
///   target is ejected.
/// - `consec_successes_threshold` (S): consecutive successes an ejected
///   target needs, once re-tried, to be marked healthy again.
/// - `eject_duration`: how long a target stays ejected before it is eligible
///   to be tried again (treated as a fixed cooldown, not a probe schedule —
///   there is no active prober in this implementation).
/// - `failure_status_codes` (R): response status codes counted as failures
///   in addition to transport errors/timeouts.
#[derive(Clone)]
pub struct HealthPolicy {
    pub consec_failures_threshold: u32,
    pub consec_successes_threshold: u32,
    pub eject_duration: Duration,
    pub failure_status_codes: HashSet<u16>,
    pub timeout_as_failure: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            consec_failures_threshold: 3,
            consec_successes_threshold: 2,
            eject_duration: Duration::from_secs(30),
            failure_status_codes: [500u16, 502, 503, 504].into_iter().collect(),
            timeout_as_failure: true,
        }
    }
}

/// Callback invoked whenever a target's health changes, so the balancer's
/// copy of `healthy` stays in sync. Kept as a plain trait object rather than
/// a generic parameter so `HealthTracker` can be stored in `Arc<dyn ...>`
/// contexts without infecting callers with a type parameter.
pub trait HealthSink: Send + Sync {
    fn set_target_health(&self, upstream_id: &str, target_addr: &str, healthy: bool);
}

pub struct HealthTracker {
    policy: HealthPolicy,
    targets: DashMap<(String, String), TrackedTarget>,
}

impl HealthTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        Self { policy, targets: DashMap::new() }
    }

    /// Whether a target is currently eligible for selection: healthy, or
    /// ejected but past its cooldown (a "probe" attempt — if it fails again
    /// it simply re-enters the ejected consec-failure count).
    pub fn is_eligible(&self, upstream_id: &str, target_addr: &str) -> bool {
        let key = (upstream_id.to_string(), target_addr.to_string());
        match self.targets.get(&key) {
            None => true,
            Some(t) => match t.state {
                TargetState::Healthy => true,
                TargetState::Ejected => t
                    .ejected_at
                    .is_some_and(|at| at.elapsed() >= self.policy.eject_duration),
            },
        }
    }

    /// Record the outcome of a request and report the transition, if any, so
    /// the caller can push it into a [`HealthSink`] (kept as a separate step
    /// rather than taking the sink here, so tests don't need one).
    pub fn record(&self, result: &RequestResult) -> Option<bool> {
        let is_failure = result.is_timeout && self.policy.timeout_as_failure
            || result
                .status_code
                .is_some_and(|c| self.policy.failure_status_codes.contains(&c));

        let key = (result.upstream_id.clone(), result.target_addr.clone());
        let mut entry = self.targets.entry(key).or_default();

        match entry.state {
            TargetState::Healthy => {
                if is_failure {
                    entry.consec_failures += 1;
                    entry.consec_successes = 0;
                    if entry.consec_failures >= self.policy.consec_failures_threshold {
                        entry.state = TargetState::Ejected;
                        entry.ejected_at = Some(Instant::now());
                        return Some(false);
                    }
                } else {
                    entry.consec_failures = 0;
                }
                None
            }
            TargetState::Ejected => {
                if is_failure {
                    entry.consec_successes = 0;
                    entry.ejected_at = Some(Instant::now());
                    None
                } else {
                    entry.consec_successes += 1;
                    if entry.consec_successes >= self.policy.consec_successes_threshold {
                        entry.state = TargetState::Healthy;
                        entry.consec_failures = 0;
                        entry.consec_successes = 0;
                        entry.ejected_at = None;
                        return Some(true);
                    }
                    None
                }
            }
        }
    }

    pub fn state(&self, upstream_id: &str, target_addr: &str) -> TargetState {
        self.targets
            .get(&(upstream_id.to_string(), target_addr.to_string()))
            .map(|t| t.state)
            .unwrap_or(TargetState::Healthy)
    }
}

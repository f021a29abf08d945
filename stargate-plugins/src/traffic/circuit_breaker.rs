use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-route circuit breaker: standard three-state machine driven by a
/// rolling count window of recent outcomes (spec.md §4.5.c). Grounded in the
/// same "rolling window + threshold -> eject, cooldown -> probe" shape as
/// `stargate-core::health`'s passive tracker, applied per-route instead of
/// per-target, with a tunable failure-ratio threshold rather than a
/// consecutive-failure count (spec.md §4.5.c fixes the window/ratio/probe
/// defaults; it leaves the trip condition itself config-driven).
pub struct CircuitBreakerPlugin;

#[derive(Debug, Clone, Deserialize)]
struct CircuitBreakerConfig {
    #[serde(default = "default_window_size")]
    window_size: usize,
    #[serde(default = "default_failure_ratio")]
    failure_ratio: f64,
    #[serde(default = "default_half_open_after_ms")]
    half_open_after_ms: u64,
    #[serde(default = "default_open_status")]
    open_status: u16,
    #[serde(default = "default_min_samples")]
    min_samples: usize,
}

fn default_window_size() -> usize {
    20
}
fn default_failure_ratio() -> f64 {
    0.5
}
fn default_half_open_after_ms() -> u64 {
    30_000
}
fn default_open_status() -> u16 {
    503
}
fn default_min_samples() -> usize {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: BreakerState,
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
            half_open_probe_in_flight: false,
        }
    }
}

struct CircuitBreakerInstance {
    cfg: CircuitBreakerConfig,
    breakers: DashMap<String, Mutex<Breaker>>,
}

impl Plugin for CircuitBreakerPlugin {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    fn priority(&self) -> i32 {
        2100
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Access, Phase::Log]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: CircuitBreakerConfig = if config.is_null() {
            serde_json::from_value(serde_json::json!({})).unwrap()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("circuit-breaker config error: {e}"))?
        };
        Ok(Box::new(CircuitBreakerInstance { cfg, breakers: DashMap::new() }))
    }
}

fn deny(status: u16) -> PluginResult {
    PluginResult::Response {
        status,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(format!(r#"{{"error":"circuit open","status":{status}}}"#).into_bytes()),
    }
}

impl PluginInstance for CircuitBreakerInstance {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    fn priority(&self) -> i32 {
        2100
    }

    fn access(&self, ctx: &mut PluginContext) -> PluginResult {
        let entry = self.breakers.entry(ctx.route_id.clone()).or_insert_with(|| Mutex::new(Breaker::new()));
        let mut b = entry.lock().unwrap();

        match b.state {
            BreakerState::Closed => PluginResult::Continue,
            BreakerState::Open => {
                let elapsed = b.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= Duration::from_millis(self.cfg.half_open_after_ms) {
                    b.state = BreakerState::HalfOpen;
                    b.half_open_probe_in_flight = true;
                    PluginResult::Continue
                } else {
                    deny(self.cfg.open_status)
                }
            }
            BreakerState::HalfOpen => {
                if b.half_open_probe_in_flight {
                    deny(self.cfg.open_status)
                } else {
                    b.half_open_probe_in_flight = true;
                    PluginResult::Continue
                }
            }
        }
    }

    fn log(&self, ctx: &mut PluginContext) -> PluginResult {
        let is_failure = ctx.response_status.map_or(true, |s| s >= 500);

        let entry = self.breakers.entry(ctx.route_id.clone()).or_insert_with(|| Mutex::new(Breaker::new()));
        let mut b = entry.lock().unwrap();

        match b.state {
            BreakerState::HalfOpen => {
                b.half_open_probe_in_flight = false;
                if is_failure {
                    b.state = BreakerState::Open;
                    b.opened_at = Some(Instant::now());
                    b.outcomes.clear();
                } else {
                    b.state = BreakerState::Closed;
                    b.outcomes.clear();
                }
            }
            BreakerState::Closed => {
                b.outcomes.push_back(!is_failure);
                if b.outcomes.len() > self.cfg.window_size {
                    b.outcomes.pop_front();
                }
                if b.outcomes.len() >= self.cfg.min_samples {
                    let failures = b.outcomes.iter().filter(|ok| !**ok).count();
                    let ratio = failures as f64 / b.outcomes.len() as f64;
                    if ratio >= self.cfg.failure_ratio {
                        b.state = BreakerState::Open;
                        b.opened_at = Some(Instant::now());
                        b.outcomes.clear();
                    }
                }
            }
            BreakerState::Open => {}
        }

        PluginResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx_with_status(status: Option<u16>) -> PluginContext {
        let mut c = PluginContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/".into(), HashMap::new());
        c.response_status = status;
        c
    }

    fn instance(cfg: serde_json::Value) -> Box<dyn PluginInstance> {
        CircuitBreakerPlugin.configure(&cfg).unwrap()
    }

    #[test]
    fn trips_open_after_failure_ratio_exceeded() {
        let inst = instance(serde_json::json!({ "window_size": 10, "failure_ratio": 0.5, "min_samples": 4 }));
        for _ in 0..5 {
            assert!(matches!(inst.access(&mut ctx_with_status(Some(200))), PluginResult::Continue));
            inst.log(&mut ctx_with_status(Some(500)));
        }
        assert!(matches!(
            inst.access(&mut ctx_with_status(None)),
            PluginResult::Response { status: 503, .. }
        ));
    }

    #[test]
    fn stays_closed_below_min_samples() {
        let inst = instance(serde_json::json!({ "min_samples": 10 }));
        for _ in 0..3 {
            inst.access(&mut ctx_with_status(None));
            inst.log(&mut ctx_with_status(Some(500)));
        }
        assert!(matches!(inst.access(&mut ctx_with_status(None)), PluginResult::Continue));
    }

    #[test]
    fn open_rejects_until_half_open_after_elapses() {
        let inst = instance(serde_json::json!({ "min_samples": 1, "failure_ratio": 0.1, "half_open_after_ms": 50 }));
        inst.access(&mut ctx_with_status(None));
        inst.log(&mut ctx_with_status(Some(500)));
        assert!(matches!(
            inst.access(&mut ctx_with_status(None)),
            PluginResult::Response { status: 503, .. }
        ));
        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(inst.access(&mut ctx_with_status(None)), PluginResult::Continue));
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let inst = instance(serde_json::json!({ "min_samples": 1, "failure_ratio": 0.1, "half_open_after_ms": 10 }));
        inst.access(&mut ctx_with_status(None));
        inst.log(&mut ctx_with_status(Some(500)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(inst.access(&mut ctx_with_status(None)), PluginResult::Continue)); // probe allowed
        inst.log(&mut ctx_with_status(Some(200)));
        assert!(matches!(inst.access(&mut ctx_with_status(None)), PluginResult::Continue)); // closed again
    }

    #[test]
    fn half_open_failure_reopens_breaker() {
        let inst = instance(serde_json::json!({ "min_samples": 1, "failure_ratio": 0.1, "half_open_after_ms": 10 }));
        inst.access(&mut ctx_with_status(None));
        inst.log(&mut ctx_with_status(Some(500)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(inst.access(&mut ctx_with_status(None)), PluginResult::Continue));
        inst.log(&mut ctx_with_status(Some(500)));
        assert!(matches!(
            inst.access(&mut ctx_with_status(None)),
            PluginResult::Response { status: 503, .. }
        ));
    }

    #[test]
    fn concurrent_half_open_only_allows_one_probe() {
        let inst = instance(serde_json::json!({ "min_samples": 1, "failure_ratio": 0.1, "half_open_after_ms": 10 }));
        inst.access(&mut ctx_with_status(None));
        inst.log(&mut ctx_with_status(Some(500)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(inst.access(&mut ctx_with_status(None)), PluginResult::Continue));
        // second concurrent request while the probe is in flight must be rejected
        assert!(matches!(
            inst.access(&mut ctx_with_status(None)),
            PluginResult::Response { status: 503, .. }
        ));
    }
}

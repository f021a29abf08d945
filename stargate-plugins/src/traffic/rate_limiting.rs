use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use dashmap::DashMap;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// Rate limiting plugin: token bucket, sliding window, or leaky bucket,
/// keyed by client IP, authenticated consumer, API key, or a combination.
pub struct RateLimitingPlugin;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
enum Algorithm {
    #[default]
    TokenBucket,
    FixedWindow,
    SlidingWindow,
    LeakyBucket,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
enum IdentifyBy {
    #[default]
    Ip,
    User,
    ApiKey,
    Combined,
}

#[derive(Debug, Deserialize, Clone)]
struct RateLimitingConfig {
    #[serde(default)]
    algorithm: Algorithm,
    /// For `token_bucket`: tokens refilled per second. For the other three
    /// algorithms: requests allowed per `window_secs`.
    #[serde(default = "default_rate")]
    rate: f64,
    /// Token-bucket capacity — how many requests can be admitted in a burst
    /// before refill catches up. Defaults to `rate` (rounded up) when unset,
    /// so a config that only sets `rate` behaves as before. Ignored by the
    /// other three algorithms.
    #[serde(default)]
    burst_size: Option<u64>,
    #[serde(default = "default_window_secs")]
    window_secs: u64,
    #[serde(default)]
    identify_by: IdentifyBy,
    #[serde(default = "default_message")]
    message: String,
}

fn default_rate() -> f64 {
    60.0
}
fn default_window_secs() -> u64 {
    60
}
fn default_message() -> String {
    "Rate limit exceeded".to_string()
}

/// Token-bucket state: `tokens` refills continuously at `rate` tokens/sec,
/// capped at `burst_size`, consumed one per request.
struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Fixed-window counter: resets to zero at each window boundary.
struct FixedWindowState {
    count: u64,
    window_start: Instant,
}

/// Sliding-window counter approximated via two adjacent fixed windows,
/// weighted by how far into the current window we are.
struct SlidingWindowState {
    current_count: u64,
    previous_count: u64,
    window_start: Instant,
}

/// Leaky bucket: a queue-depth counter that drains at a constant rate;
/// requests are admitted while depth stays under `rate`.
struct LeakyBucketState {
    level: f64,
    last_leak: Instant,
}

enum BucketState {
    TokenBucket(TokenBucketState),
    FixedWindow(FixedWindowState),
    SlidingWindow(SlidingWindowState),
    LeakyBucket(LeakyBucketState),
}

struct RateLimitingInstance {
    algorithm: Algorithm,
    rate: f64,
    burst_size: u64,
    window_secs: u64,
    identify_by: IdentifyBy,
    message: String,
    buckets: DashMap<String, BucketState>,
}

impl Plugin for RateLimitingPlugin {
    fn name(&self) -> &str {
        "rate-limiting"
    }

    fn priority(&self) -> i32 {
        2600
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Access]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: RateLimitingConfig = serde_json::from_value(config.clone())?;

        // Invalid rate/burstSize are clamped rather than rejected, so a
        // malformed route config degrades to "very restrictive" instead of
        // failing to load.
        let rate = if cfg.rate > 0.0 { cfg.rate } else { 1.0 };
        let window_secs = if cfg.window_secs > 0 { cfg.window_secs } else { 1 };
        let burst_size = match cfg.burst_size {
            Some(0) => 1,
            Some(b) => b,
            None => rate.ceil().max(1.0) as u64,
        };

        Ok(Box::new(RateLimitingInstance {
            algorithm: cfg.algorithm,
            rate,
            burst_size,
            window_secs,
            identify_by: cfg.identify_by,
            message: cfg.message,
            buckets: DashMap::new(),
        }))
    }
}

impl RateLimitingInstance {
    fn key_for(&self, ctx: &PluginContext) -> String {
        let identity = match self.identify_by {
            IdentifyBy::Ip => ctx.client_ip.clone(),
            IdentifyBy::User => ctx.consumer.clone().unwrap_or_else(|| "anonymous".into()),
            IdentifyBy::ApiKey => ctx
                .get_var("api_key")
                .and_then(|v| v.as_str())
                .unwrap_or("anonymous")
                .to_string(),
            IdentifyBy::Combined => format!(
                "{}:{}",
                ctx.client_ip,
                ctx.consumer.as_deref().unwrap_or("anonymous")
            ),
        };
        format!("{}:{}", ctx.route_id, identity)
    }

    fn admit_token_bucket(&self, state: &mut TokenBucketState, now: Instant) -> bool {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst_size as f64);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn admit_fixed_window(&self, state: &mut FixedWindowState, now: Instant) -> bool {
        let window = Duration::from_secs(self.window_secs);
        if now.duration_since(state.window_start) >= window {
            state.count = 0;
            state.window_start = now;
        }

        if (state.count as f64) < self.rate {
            state.count += 1;
            true
        } else {
            false
        }
    }

    fn admit_sliding_window(&self, state: &mut SlidingWindowState, now: Instant) -> bool {
        let window = Duration::from_secs(self.window_secs);
        let elapsed = now.duration_since(state.window_start);
        if elapsed >= window * 2 {
            state.previous_count = 0;
            state.current_count = 0;
            state.window_start = now;
        } else if elapsed >= window {
            state.previous_count = state.current_count;
            state.current_count = 0;
            state.window_start += window;
        }

        let elapsed_in_current = now
            .duration_since(state.window_start)
            .as_secs_f64()
            .min(self.window_secs as f64);
        let weight = 1.0 - elapsed_in_current / self.window_secs as f64;
        let estimate = state.previous_count as f64 * weight + state.current_count as f64;

        if estimate < self.rate {
            state.current_count += 1;
            true
        } else {
            false
        }
    }

    fn admit_leaky_bucket(&self, state: &mut LeakyBucketState, now: Instant) -> bool {
        let elapsed = now.duration_since(state.last_leak).as_secs_f64();
        let leak_rate = self.rate / self.window_secs as f64;
        state.level = (state.level - elapsed * leak_rate).max(0.0);
        state.last_leak = now;

        if state.level + 1.0 <= self.rate {
            state.level += 1.0;
            true
        } else {
            false
        }
    }

    fn admit(&self, key: String) -> bool {
        let now = Instant::now();
        let mut entry = self.buckets.entry(key).or_insert_with(|| match self.algorithm {
            Algorithm::TokenBucket => BucketState::TokenBucket(TokenBucketState {
                tokens: self.burst_size as f64,
                last_refill: now,
            }),
            Algorithm::FixedWindow => BucketState::FixedWindow(FixedWindowState {
                count: 0,
                window_start: now,
            }),
            Algorithm::SlidingWindow => BucketState::SlidingWindow(SlidingWindowState {
                current_count: 0,
                previous_count: 0,
                window_start: now,
            }),
            Algorithm::LeakyBucket => BucketState::LeakyBucket(LeakyBucketState {
                level: 0.0,
                last_leak: now,
            }),
        });

        match &mut *entry {
            BucketState::TokenBucket(s) => self.admit_token_bucket(s, now),
            BucketState::FixedWindow(s) => self.admit_fixed_window(s, now),
            BucketState::SlidingWindow(s) => self.admit_sliding_window(s, now),
            BucketState::LeakyBucket(s) => self.admit_leaky_bucket(s, now),
        }
    }
}

impl PluginInstance for RateLimitingInstance {
    fn name(&self) -> &str {
        "rate-limiting"
    }

    fn priority(&self) -> i32 {
        2600
    }

    fn access(&self, ctx: &mut PluginContext) -> PluginResult {
        let key = self.key_for(ctx);
        if self.admit(key) {
            return PluginResult::Continue;
        }

        let limit = match self.algorithm {
            Algorithm::TokenBucket => self.burst_size,
            _ => self.rate.round() as u64,
        };

        PluginResult::Response {
            status: 429,
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("x-ratelimit-limit".to_string(), limit.to_string()),
                ("retry-after".to_string(), self.window_secs.to_string()),
            ],
            body: Some(format!(r#"{{"error":"{}","status":429}}"#, self.message).into_bytes()),
        }
    }
}

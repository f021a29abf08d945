use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Traffic mirror plugin: on Bernoulli sample hit, fires an async
/// fire-and-forget copy of the request at a mirror target (spec.md §4.5.d).
/// The copy runs on the shared `tokio` runtime the config reconciler and
/// other non-hot-path async work use (see SPEC_FULL.md §5), captured at
/// `configure()` time, so the `before_proxy` call on the monoio worker thread
/// never itself awaits I/O.
pub struct TrafficMirrorPlugin;

#[derive(Debug, Clone, Deserialize)]
struct MirrorTarget {
    name: String,
    url: String,
    #[serde(default = "default_sample_rate")]
    sample_rate: f64,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

fn default_sample_rate() -> f64 {
    1.0
}
fn default_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TrafficMirrorConfig {
    #[serde(default)]
    targets: Vec<MirrorTarget>,
}

#[derive(Default)]
struct TargetStats {
    mirrored: AtomicU64,
    failed: AtomicU64,
}

struct TrafficMirrorInstance {
    targets: Vec<MirrorTarget>,
    client: reqwest::Client,
    handle: Option<tokio::runtime::Handle>,
    stats: Arc<DashMap<String, TargetStats>>,
}

impl Plugin for TrafficMirrorPlugin {
    fn name(&self) -> &str {
        "traffic-mirror"
    }

    fn priority(&self) -> i32 {
        2000
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::BeforeProxy]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: TrafficMirrorConfig = if config.is_null() {
            TrafficMirrorConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("traffic-mirror config error: {e}"))?
        };
        for t in &cfg.targets {
            if !(0.0..=1.0).contains(&t.sample_rate) {
                anyhow::bail!("traffic-mirror: sample_rate must be within [0,1] for target {}", t.name);
            }
        }
        let stats = DashMap::new();
        for t in &cfg.targets {
            stats.insert(t.name.clone(), TargetStats::default());
        }
        Ok(Box::new(TrafficMirrorInstance {
            targets: cfg.targets,
            client: reqwest::Client::new(),
            handle: tokio::runtime::Handle::try_current().ok(),
            stats: Arc::new(stats),
        }))
    }
}

impl PluginInstance for TrafficMirrorInstance {
    fn name(&self) -> &str {
        "traffic-mirror"
    }

    fn priority(&self) -> i32 {
        2000
    }

    fn before_proxy(&self, ctx: &mut PluginContext) -> PluginResult {
        let Some(handle) = &self.handle else {
            return PluginResult::Continue;
        };

        for target in &self.targets {
            if !rand::rng().random_bool(target.sample_rate) {
                continue;
            }

            let client = self.client.clone();
            let url = format!("{}{}", target.url, ctx.request_path);
            let method = ctx.request_method.clone();
            let body = ctx.request_body.clone();
            let timeout = Duration::from_millis(target.timeout_ms);
            let mut headers = ctx.request_headers.clone();
            headers.insert("x-mirror-source".to_string(), "stargate".to_string());
            for (k, v) in &target.headers {
                headers.insert(k.clone(), v.clone());
            }
            let target_name = target.name.clone();

            self.stats
                .entry(target_name.clone())
                .or_default()
                .mirrored
                .fetch_add(1, Ordering::Relaxed);

            let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
            let mut req = client.request(method, &url).timeout(timeout);
            for (k, v) in &headers {
                req = req.header(k, v);
            }
            if let Some(b) = body {
                req = req.body(b);
            }

            // Fire-and-forget: the primary response never awaits this.
            let stats = Arc::clone(&self.stats);
            handle.spawn(async move {
                if req.send().await.is_err() {
                    stats.entry(target_name.clone()).or_default().failed.fetch_add(1, Ordering::Relaxed);
                    warn!(target = %target_name, "traffic mirror request failed");
                }
            });
        }

        PluginResult::Continue
    }
}

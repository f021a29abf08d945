use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::Deserialize;

/// Aggregator stage (spec.md item 11): composes multiple upstream calls into
/// one response, enabled per-route. The fan-out/compose implementation is out
/// of scope per spec.md §1 ("specific plugin implementations... out of scope;
/// only their interfaces are specified") — this exposes the documented config
/// surface (the set of calls to compose) and occupies the pipeline slot as a
/// pass-through so the ordering contract holds even on routes that declare it.
pub struct AggregatorPlugin;

#[derive(Debug, Clone, Deserialize)]
struct AggregateCall {
    name: String,
    #[serde(default)]
    upstream_id: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AggregatorConfig {
    #[serde(default)]
    calls: Vec<AggregateCall>,
}

struct AggregatorInstance {
    calls: Vec<AggregateCall>,
}

impl Plugin for AggregatorPlugin {
    fn name(&self) -> &str {
        "aggregator"
    }

    fn priority(&self) -> i32 {
        2400
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::BeforeProxy]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: AggregatorConfig = if config.is_null() {
            AggregatorConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("aggregator config error: {e}"))?
        };
        Ok(Box::new(AggregatorInstance { calls: cfg.calls }))
    }
}

impl PluginInstance for AggregatorInstance {
    fn name(&self) -> &str {
        "aggregator"
    }

    fn priority(&self) -> i32 {
        2400
    }

    fn before_proxy(&self, ctx: &mut PluginContext) -> PluginResult {
        if !self.calls.is_empty() {
            let names: Vec<_> = self.calls.iter().map(|c| c.name.clone()).collect();
            ctx.set_var("aggregator_calls".to_string(), serde_json::json!(names));
        }
        PluginResult::Continue
    }
}

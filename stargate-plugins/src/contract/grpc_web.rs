use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::Deserialize;

/// gRPC-Web protocol translation stage (spec.md item 7). Translation itself
/// (base64/length-prefixed-frame unwrapping between a gRPC-Web client and a
/// native gRPC upstream) is out of scope per spec.md §1 — only the pipeline
/// slot and per-route enable/disable contract are implemented. Occupies its
/// stage so downstream plugins see a consistent phase ordering whether or not
/// gRPC-Web traffic is actually present on a route.
pub struct GrpcWebPlugin;

#[derive(Debug, Clone, Deserialize, Default)]
struct GrpcWebConfig {
    #[serde(default)]
    enabled: bool,
}

struct GrpcWebInstance {
    enabled: bool,
}

impl Plugin for GrpcWebPlugin {
    fn name(&self) -> &str {
        "grpc-web"
    }

    fn priority(&self) -> i32 {
        2800
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Rewrite]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: GrpcWebConfig = if config.is_null() {
            GrpcWebConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("grpc-web config error: {e}"))?
        };
        Ok(Box::new(GrpcWebInstance { enabled: cfg.enabled }))
    }
}

impl PluginInstance for GrpcWebInstance {
    fn name(&self) -> &str {
        "grpc-web"
    }

    fn priority(&self) -> i32 {
        2800
    }

    fn rewrite(&self, ctx: &mut PluginContext) -> PluginResult {
        if self.enabled {
            ctx.set_var("grpc_web".to_string(), serde_json::Value::Bool(true));
        }
        PluginResult::Continue
    }
}

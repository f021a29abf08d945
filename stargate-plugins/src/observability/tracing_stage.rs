use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use tracing::info_span;
use uuid::Uuid;

/// Outermost tracing stage. Stamps every request with a `tracing::Span` and
/// an `X-Request-Id`, so every later stage's `tracing` events (including
/// `access_log_stage` and error paths) nest under it and carry the same
/// correlation id. Reuses `tracing`'s span machinery rather than
/// hand-rolling correlation ids.
pub struct TracingPlugin;

struct TracingInstance;

impl Plugin for TracingPlugin {
    fn name(&self) -> &str {
        "tracing"
    }

    fn priority(&self) -> i32 {
        3400
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Rewrite]
    }

    fn configure(&self, _config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(TracingInstance))
    }
}

impl PluginInstance for TracingInstance {
    fn name(&self) -> &str {
        "tracing"
    }

    fn priority(&self) -> i32 {
        3400
    }

    fn rewrite(&self, ctx: &mut PluginContext) -> PluginResult {
        let request_id = ctx
            .get_header("x-request-id")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = info_span!(
            "request",
            request_id = %request_id,
            route_id = %ctx.route_id,
            method = %ctx.request_method,
            path = %ctx.request_path,
        );
        let _entered = span.entered();

        ctx.set_header("x-request-id".to_string(), request_id.clone());
        ctx.set_var("request_id".to_string(), serde_json::Value::String(request_id));
        PluginResult::Continue
    }
}

use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use tracing::info;

/// Records a structured `tracing` event (JSON formatter, ambient logging
/// layer) on the Log phase with the standard access-log field set, rather
/// than pushing to an external log sink.
pub struct AccessLogPlugin;

struct AccessLogInstance;

impl Plugin for AccessLogPlugin {
    fn name(&self) -> &str {
        "access-log"
    }

    fn priority(&self) -> i32 {
        3300
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Log]
    }

    fn configure(&self, _config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(AccessLogInstance))
    }
}

impl PluginInstance for AccessLogInstance {
    fn name(&self) -> &str {
        "access-log"
    }

    fn priority(&self) -> i32 {
        3300
    }

    fn log(&self, ctx: &mut PluginContext) -> PluginResult {
        info!(
            route_id = %ctx.route_id,
            client_ip = %ctx.client_ip,
            method = %ctx.request_method,
            uri = %ctx.request_path,
            status = ctx.response_status.unwrap_or(0),
            latency_ms = ctx.elapsed_ms(),
            upstream_addr = ctx.upstream_addr.as_deref().unwrap_or(""),
            bytes = ctx.response_body.as_ref().map(Vec::len).unwrap_or(0),
            "access"
        );
        PluginResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx() -> PluginContext {
        let mut c = PluginContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), HashMap::new());
        c.response_status = Some(200);
        c
    }

    #[test]
    fn logging_a_request_never_short_circuits() {
        let instance = AccessLogPlugin.configure(&serde_json::Value::Null).unwrap();
        let mut c = ctx();
        assert!(matches!(instance.log(&mut c), PluginResult::Continue));
    }

    #[test]
    fn logging_without_a_response_status_does_not_panic() {
        let instance = AccessLogPlugin.configure(&serde_json::Value::Null).unwrap();
        let mut c = PluginContext::new("r1".into(), "1.2.3.4".into(), "GET".into(), "/x".into(), HashMap::new());
        assert!(matches!(instance.log(&mut c), PluginResult::Continue));
    }
}

use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::Deserialize;

/// Mock response plugin: if a configured rule matches the request, synthesize
/// a response and skip downstream stages and the upstream call entirely
/// (spec.md §4.5 item 6).
pub struct MockResponsePlugin;

#[derive(Debug, Clone, Deserialize)]
struct MockRule {
    #[serde(default)]
    path_prefix: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
    #[serde(default)]
    body: Option<String>,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize, Default)]
struct MockResponseConfig {
    #[serde(default)]
    rules: Vec<MockRule>,
}

struct MockResponseInstance {
    rules: Vec<MockRule>,
}

impl Plugin for MockResponsePlugin {
    fn name(&self) -> &str {
        "mock-response"
    }

    fn priority(&self) -> i32 {
        2900
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Access]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: MockResponseConfig = if config.is_null() {
            MockResponseConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("mock-response config error: {e}"))?
        };
        Ok(Box::new(MockResponseInstance { rules: cfg.rules }))
    }
}

impl MockRule {
    fn matches(&self, ctx: &PluginContext) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !ctx.request_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if !method.eq_ignore_ascii_case(&ctx.request_method) {
                return false;
            }
        }
        true
    }
}

impl PluginInstance for MockResponseInstance {
    fn name(&self) -> &str {
        "mock-response"
    }

    fn priority(&self) -> i32 {
        2900
    }

    fn access(&self, ctx: &mut PluginContext) -> PluginResult {
        let Some(rule) = self.rules.iter().find(|r| r.matches(ctx)) else {
            return PluginResult::Continue;
        };

        PluginResult::Response {
            status: rule.status,
            headers: rule.headers.clone(),
            body: rule.body.clone().map(|s| s.into_bytes()),
        }
    }
}

use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::Deserialize;

/// Header transform plugin: ordered add/remove/rename/replace rules applied
/// to the request (`rewrite` phase) and/or the response (`header_filter`
/// phase), per spec.md §4.5 item 5.
pub struct HeaderTransformPlugin;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum RuleOp {
    /// Idempotent set with `${var}` interpolation; does nothing if the
    /// header is already present.
    Add,
    /// Case-insensitive removal.
    Remove,
    /// Renames a header, preserving its value.
    Rename,
    /// Unconditional set (overwrites any existing value).
    Replace,
}

#[derive(Debug, Clone, Deserialize)]
struct HeaderRule {
    op: RuleOp,
    name: String,
    /// Required for add/replace (the interpolated value) and rename (the new
    /// name, reusing `name`'s slot as the target header name to rename to).
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct HeaderTransformConfig {
    #[serde(default)]
    request: Vec<HeaderRule>,
    #[serde(default)]
    response: Vec<HeaderRule>,
}

struct HeaderTransformInstance {
    cfg: HeaderTransformConfig,
}

impl Plugin for HeaderTransformPlugin {
    fn name(&self) -> &str {
        "header-transform"
    }

    fn priority(&self) -> i32 {
        3000
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Rewrite, Phase::HeaderFilter]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: HeaderTransformConfig = if config.is_null() {
            HeaderTransformConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("header-transform config error: {e}"))?
        };
        Ok(Box::new(HeaderTransformInstance { cfg }))
    }
}

fn interpolate(template: &str, ctx: &PluginContext) -> String {
    template
        .replace("${method}", &ctx.request_method)
        .replace("${path}", &ctx.request_path)
}

fn find_header<'a>(headers: &'a std::collections::HashMap<String, String>, name: &str) -> Option<(&'a String, &'a String)> {
    let lower = name.to_ascii_lowercase();
    headers.iter().find(|(k, _)| k.to_ascii_lowercase() == lower)
}

impl HeaderTransformInstance {
    fn apply_request(&self, rules: &[HeaderRule], ctx: &mut PluginContext) {
        for rule in rules {
            match rule.op {
                RuleOp::Add => {
                    if find_header(&ctx.request_headers, &rule.name).is_none() {
                        let value = interpolate(rule.value.as_deref().unwrap_or(""), ctx);
                        ctx.set_header(rule.name.clone(), value);
                    }
                }
                RuleOp::Replace => {
                    let value = interpolate(rule.value.as_deref().unwrap_or(""), ctx);
                    ctx.set_header(rule.name.clone(), value);
                }
                RuleOp::Remove => {
                    ctx.remove_header(&rule.name);
                }
                RuleOp::Rename => {
                    if let Some((_, v)) = find_header(&ctx.request_headers, &rule.name) {
                        let v = v.clone();
                        ctx.remove_header(&rule.name);
                        if let Some(new_name) = &rule.value {
                            ctx.set_header(new_name.clone(), v);
                        }
                    }
                }
            }
        }
    }

    fn apply_response(&self, rules: &[HeaderRule], ctx: &mut PluginContext) {
        for rule in rules {
            match rule.op {
                RuleOp::Add => {
                    if find_header(&ctx.response_headers, &rule.name).is_none() {
                        let value = interpolate(rule.value.as_deref().unwrap_or(""), ctx);
                        ctx.set_response_header(rule.name.clone(), value);
                    }
                }
                RuleOp::Replace => {
                    let value = interpolate(rule.value.as_deref().unwrap_or(""), ctx);
                    ctx.set_response_header(rule.name.clone(), value);
                }
                RuleOp::Remove => {
                    let lower = rule.name.to_ascii_lowercase();
                    ctx.response_headers.retain(|k, _| k.to_ascii_lowercase() != lower);
                }
                RuleOp::Rename => {
                    if let Some((_, v)) = find_header(&ctx.response_headers, &rule.name) {
                        let v = v.clone();
                        let lower = rule.name.to_ascii_lowercase();
                        ctx.response_headers.retain(|k, _| k.to_ascii_lowercase() != lower);
                        if let Some(new_name) = &rule.value {
                            ctx.set_response_header(new_name.clone(), v);
                        }
                    }
                }
            }
        }
    }
}

impl PluginInstance for HeaderTransformInstance {
    fn name(&self) -> &str {
        "header-transform"
    }

    fn priority(&self) -> i32 {
        3000
    }

    fn rewrite(&self, ctx: &mut PluginContext) -> PluginResult {
        self.apply_request(&self.cfg.request, ctx);
        PluginResult::Continue
    }

    fn header_filter(&self, ctx: &mut PluginContext) -> PluginResult {
        self.apply_response(&self.cfg.response, ctx);
        PluginResult::Continue
    }
}

use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Basic-auth plugin — APISIX-compatible.
///
/// Extracts credentials from `Authorization: Basic <base64>` header and
/// stores them in `ctx.vars` for downstream consumer validation.
pub struct BasicAuthPlugin;

struct BasicAuthInstance;

impl Plugin for BasicAuthPlugin {
    fn name(&self) -> &str {
        "basic-auth"
    }

    fn priority(&self) -> i32 {
        2520 // Higher than key-auth (2500)
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Access]
    }

    fn configure(&self, _config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        Ok(Box::new(BasicAuthInstance))
    }
}

impl PluginInstance for BasicAuthInstance {
    fn name(&self) -> &str {
        "basic-auth"
    }

    fn priority(&self) -> i32 {
        2520
    }

    fn access(&self, ctx: &mut PluginContext) -> PluginResult {
        let header = match ctx.get_header("authorization") {
            Some(h) => h.to_string(),
            None => {
                return deny_401(br#"{"error":"Missing authorization header","status":401}"#);
            }
        };

        let encoded = match header.strip_prefix("Basic ").or_else(|| header.strip_prefix("basic ")) {
            Some(e) => e,
            None => {
                return deny_401(br#"{"error":"Invalid authorization scheme","status":401}"#);
            }
        };

        let decoded = match BASE64.decode(encoded.trim()) {
            Ok(b) => b,
            Err(_) => {
                return deny_401(br#"{"error":"Invalid base64 encoding","status":401}"#);
            }
        };

        let credentials = match String::from_utf8(decoded) {
            Ok(s) => s,
            Err(_) => {
                return deny_401(br#"{"error":"Invalid credentials encoding","status":401}"#);
            }
        };

        let (username, password) = match credentials.split_once(':') {
            Some((u, p)) => (u.to_string(), p.to_string()),
            None => {
                return deny_401(br#"{"error":"Malformed credentials","status":401}"#);
            }
        };

        ctx.vars.insert("_basic_auth_user".to_string(), serde_json::Value::String(username));
        ctx.vars.insert("_basic_auth_pass".to_string(), serde_json::Value::String(password));

        PluginResult::Continue
    }
}

fn deny_401(body: &'static [u8]) -> PluginResult {
    PluginResult::Response {
        status: 401,
        headers: vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("www-authenticate".to_string(), r#"Basic realm="Stargate""#.to_string()),
        ],
        body: Some(body.to_vec()),
    }
}

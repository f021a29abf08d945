use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Serverless callout plugin: pre/post HTTP callouts matched by
/// path+method+optional-header conjunction (spec.md §4.5.b). Callouts are
/// invoked with `reqwest::blocking::Client` rather than the crate's async
/// client — `PluginInstance`'s phase methods are synchronous by design (see
/// DESIGN.md's Open Question 4), and a callout's result must be available
/// before the method returns since it can rewrite the forwarded request.
/// This blocks the calling worker thread for the callout's duration, a
/// scoped tradeoff of the sync pipeline contract, not an oversight.
pub struct ServerlessCalloutPlugin;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum OnError {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
struct HeaderMatch {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CalloutFn {
    url: String,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_on_error")]
    on_error: OnError,
}

fn default_retries() -> u32 {
    0
}
fn default_timeout_ms() -> u64 {
    3000
}
fn default_on_error() -> OnError {
    OnError::Abort
}

#[derive(Debug, Clone, Deserialize)]
struct CalloutRule {
    #[serde(default)]
    path_prefix: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Vec<HeaderMatch>,
    #[serde(default)]
    pre: Vec<CalloutFn>,
    #[serde(default)]
    post: Vec<CalloutFn>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ServerlessCalloutConfig {
    #[serde(default)]
    rules: Vec<CalloutRule>,
}

struct ServerlessCalloutInstance {
    rules: Vec<CalloutRule>,
    client: reqwest::blocking::Client,
}

impl Plugin for ServerlessCalloutPlugin {
    fn name(&self) -> &str {
        "serverless-callout"
    }

    fn priority(&self) -> i32 {
        2300
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::BeforeProxy, Phase::BodyFilter]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: ServerlessCalloutConfig = if config.is_null() {
            ServerlessCalloutConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("serverless-callout config error: {e}"))?
        };
        Ok(Box::new(ServerlessCalloutInstance {
            rules: cfg.rules,
            client: reqwest::blocking::Client::new(),
        }))
    }
}

impl CalloutRule {
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
        self.headers.iter().all(|h| ctx.get_header(&h.name) == Some(h.value.as_str()))
    }
}

#[derive(Serialize)]
struct CalloutRequest<'a> {
    method: &'a str,
    path: &'a str,
    headers: &'a std::collections::HashMap<String, String>,
    body: Option<String>,
    query: &'a str,
}

#[derive(Deserialize, Default)]
struct CalloutResponse {
    #[serde(default)]
    headers: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    status: Option<u16>,
}

impl ServerlessCalloutInstance {
    /// Invoke one callout with linear retry backoff `(attempt+1)*100ms`.
    /// Returns `Ok(None)` if the function errored and its policy is
    /// `continue`; `Err` only when the policy is `abort`.
    fn invoke(&self, f: &CalloutFn, payload: &CalloutRequest) -> Result<Option<CalloutResponse>, String> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&f.url)
                .timeout(Duration::from_millis(f.timeout_ms))
                .json(payload)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json::<CalloutResponse>());

            match result {
                Ok(resp) => return Ok(Some(resp)),
                Err(e) => {
                    if attempt >= f.retries {
                        return match f.on_error {
                            OnError::Continue => {
                                warn!(url = %f.url, error = %e, "serverless callout failed, continuing");
                                Ok(None)
                            }
                            OnError::Abort => Err(format!("serverless callout {} failed: {e}", f.url)),
                        };
                    }
                    thread::sleep(Duration::from_millis((attempt as u64 + 1) * 100));
                    attempt += 1;
                }
            }
        }
    }
}

impl PluginInstance for ServerlessCalloutInstance {
    fn name(&self) -> &str {
        "serverless-callout"
    }

    fn priority(&self) -> i32 {
        2300
    }

    fn before_proxy(&self, ctx: &mut PluginContext) -> PluginResult {
        let Some(rule) = self.rules.iter().find(|r| r.matches(ctx)) else {
            return PluginResult::Continue;
        };

        for f in &rule.pre {
            let payload = CalloutRequest {
                method: &ctx.request_method,
                path: &ctx.request_path,
                headers: &ctx.request_headers,
                body: ctx.request_body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
                query: &ctx.request_query,
            };

            match self.invoke(f, &payload) {
                Ok(Some(resp)) => {
                    if let Some(status) = resp.status {
                        return PluginResult::Response { status, headers: vec![], body: resp.body.map(String::into_bytes) };
                    }
                    if let Some(headers) = resp.headers {
                        for (k, v) in headers {
                            ctx.set_header(k, v);
                        }
                    }
                    if let Some(body) = resp.body {
                        ctx.request_body = Some(body.into_bytes());
                    }
                }
                Ok(None) => {}
                Err(msg) => return PluginResult::Error(msg),
            }
        }

        PluginResult::Continue
    }

    fn body_filter(&self, ctx: &mut PluginContext) -> PluginResult {
        let Some(rule) = self.rules.iter().find(|r| r.matches(ctx)) else {
            return PluginResult::Continue;
        };

        for f in &rule.post {
            let payload = CalloutRequest {
                method: &ctx.request_method,
                path: &ctx.request_path,
                headers: &ctx.response_headers,
                body: ctx.response_body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()),
                query: &ctx.request_query,
            };
            // Post-process failures never affect the response already sent.
            let _ = self.invoke(f, &payload);
        }

        PluginResult::Continue
    }
}

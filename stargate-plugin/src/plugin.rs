use serde_json::Value;
use stargate_core::consumer::Consumer;
use std::collections::HashMap;

/// Plugin execution phases, matching the pipeline's fixed stage groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Modify request before routing takes place
    Rewrite = 0,
    /// Authentication, authorization, rate limiting
    Access = 1,
    /// Just before proxying to upstream
    BeforeProxy = 2,
    /// Modify response headers from upstream
    HeaderFilter = 3,
    /// Modify response body from upstream
    BodyFilter = 4,
    /// Post-response logging (non-blocking)
    Log = 5,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Rewrite => "rewrite",
            Phase::Access => "access",
            Phase::BeforeProxy => "before_proxy",
            Phase::HeaderFilter => "header_filter",
            Phase::BodyFilter => "body_filter",
            Phase::Log => "log",
        }
    }

    pub fn all() -> &'static [Phase] {
        &[
            Phase::Rewrite,
            Phase::Access,
            Phase::BeforeProxy,
            Phase::HeaderFilter,
            Phase::BodyFilter,
            Phase::Log,
        ]
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of plugin execution at one phase.
#[derive(Debug, Clone)]
pub enum PluginResult {
    /// Continue to the next plugin / phase
    Continue,

    /// Short-circuit with a response (e.g. 401, 403, 429)
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    },

    /// Error during plugin execution
    Error(String),
}

/// Mutable context threaded through the plugin pipeline for one request.
pub struct PluginContext {
    pub route_id: String,
    pub client_ip: String,

    // --- Request data ---
    pub request_method: String,
    pub request_path: String,
    pub request_query: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<Vec<u8>>,

    /// Path parameters from router matching (reserved for future use; the
    /// matcher does not currently extract named parameters).
    pub path_params: HashMap<String, String>,

    // --- Response data (populated after the upstream response arrives) ---
    pub response_status: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<Vec<u8>>,

    /// Shared key-value store plugins use to pass data to later stages
    /// (e.g. the auth family stashes the credential here for the proxy to
    /// resolve against the consumer store).
    pub vars: HashMap<String, Value>,

    /// Consumer identity established by an auth plugin, if any — a username
    /// or JWT subject, not a full record (auth plugins stash credentials in
    /// `vars` for the proxy layer to resolve against `consumers`; `jwt-auth`
    /// is the exception, trusting the token's `sub` claim directly).
    pub consumer: Option<String>,

    pub service_id: Option<String>,

    pub request_start: std::time::Instant,

    pub upstream_addr: Option<String>,

    /// Snapshot of consumers, populated by the proxy before the pipeline
    /// runs so auth plugins can validate credentials without a store lookup
    /// per plugin.
    pub consumers: HashMap<String, Consumer>,
}

impl PluginContext {
    pub fn new(
        route_id: String,
        client_ip: String,
        method: String,
        path: String,
        headers: HashMap<String, String>,
    ) -> Self {
        let (path, query) = match path.find('?') {
            Some(pos) => (path[..pos].to_string(), path[pos + 1..].to_string()),
            None => (path, String::new()),
        };

        Self {
            route_id,
            client_ip,
            request_method: method,
            request_path: path,
            request_query: query,
            request_headers: headers,
            request_body: None,
            path_params: HashMap::new(),
            response_status: None,
            response_headers: HashMap::new(),
            response_body: None,
            vars: HashMap::new(),
            consumer: None,
            service_id: None,
            request_start: std::time::Instant::now(),
            upstream_addr: None,
            consumers: HashMap::new(),
        }
    }

    /// Get a request header (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.request_headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: String, value: String) {
        self.request_headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        let lower = name.to_lowercase();
        self.request_headers.retain(|k, _| k.to_lowercase() != lower);
    }

    pub fn set_response_header(&mut self, name: String, value: String) {
        self.response_headers.insert(name, value);
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.request_start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn set_var(&mut self, key: String, value: Value) {
        self.vars.insert(key, value);
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }
}

/// A plugin factory: stateless, shared across requests, producing a fresh
/// [`PluginInstance`] per route (or per `PluginConfig`) the plugin is
/// attached to. `configure` runs once at route-table rebuild time, not per
/// request, so validation/precomputation belongs there.
pub trait Plugin: Send + Sync {
    /// Plugin name (must be unique in the registry).
    fn name(&self) -> &str;

    /// Fixed priority band. Higher runs first within a phase. Built-in
    /// stages use the bands documented in `stargate-plugins::PRIORITY_*` so
    /// their relative order matches the gateway's declared pipeline order
    /// regardless of registration order.
    fn priority(&self) -> i32;

    /// Which phases this plugin participates in.
    fn phases(&self) -> &[Phase];

    /// Validate and precompile `config` into a request-ready instance.
    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>>;
}

/// A plugin bound to one route's configuration. Every phase method defaults
/// to `Continue` so a plugin only needs to implement the phases it declared
/// in [`Plugin::phases`].
pub trait PluginInstance: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    fn rewrite(&self, _ctx: &mut PluginContext) -> PluginResult {
        PluginResult::Continue
    }

    fn access(&self, _ctx: &mut PluginContext) -> PluginResult {
        PluginResult::Continue
    }

    fn before_proxy(&self, _ctx: &mut PluginContext) -> PluginResult {
        PluginResult::Continue
    }

    fn header_filter(&self, _ctx: &mut PluginContext) -> PluginResult {
        PluginResult::Continue
    }

    fn body_filter(&self, _ctx: &mut PluginContext) -> PluginResult {
        PluginResult::Continue
    }

    fn log(&self, _ctx: &mut PluginContext) -> PluginResult {
        PluginResult::Continue
    }
}

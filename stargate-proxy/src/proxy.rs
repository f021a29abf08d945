use stargate_core::balancer::Balancer;
use stargate_core::config::StargateConfig;
use stargate_core::plugin_config::PluginConfig;
use stargate_core::router::Router;
use stargate_core::service::Service;
use stargate_core::upstream::Target;
use stargate_plugin::pipeline::PluginPipeline;
use stargate_plugin::plugin::{Phase, PluginContext, PluginResult};
use stargate_plugin::registry::PluginRegistry;
use stargate_store::cache::ConfigCache;
use monoio::net::TcpStream;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// ── Pre-built static error responses (zero heap alloc) ────────

pub const RESP_404: &[u8] =
    b"HTTP/1.1 404 Not Found\r\ncontent-type: application/json\r\ncontent-length: 41\r\nconnection: keep-alive\r\n\r\n{\"error\":\"no route matched\",\"status\":404}";

pub const RESP_401_INVALID: &[u8] =
    b"HTTP/1.1 401 Unauthorized\r\ncontent-type: application/json\r\ncontent-length: 40\r\nconnection: keep-alive\r\n\r\n{\"error\":\"Invalid API key\",\"status\":401}";

pub const RESP_502: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\ncontent-type: application/json\r\ncontent-length: 39\r\nconnection: keep-alive\r\n\r\n{\"error\":\"upstream error\",\"status\":502}";

/// Plugin names carrying consumer identity — pipeline build marks a route as
/// needing consumer resolution when any of these appear in its merged plugin
/// set.
const AUTH_PLUGINS: &[&str] = &["key-auth", "jwt-auth", "basic-auth"];

// ── ProxyWorker ───────────────────────────────────────────────

/// Per-worker proxy state. Created ONCE per thread, reused across
/// all connections via Rc<RefCell<ProxyWorker>>.
///
/// All caches are plain HashMaps — zero atomics on hot path.
/// DashMap is only touched during config rebuild (cold path).
pub struct ProxyWorker {
    /// Current frozen router.
    router: Arc<Router>,
    /// Router version for cache invalidation.
    router_version: u64,
    /// Target selection, shared with the config reconciler.
    balancer: Arc<Balancer>,

    // ── Thread-local caches (rebuilt on version change) ──
    pipeline_cache: HashMap<String, (Arc<PluginPipeline>, bool)>,

    // ── Snapshots from DashMap (cold path only) ──
    services: HashMap<String, Service>,
    plugin_configs: HashMap<String, PluginConfig>,
    /// API key -> consumer username, built from every consumer's `key-auth`
    /// plugin config.
    consumer_keys: HashMap<String, String>,
    /// (username, password) -> consumer username, built from every
    /// consumer's `basic-auth` plugin config.
    consumer_basic: HashMap<(String, String), String>,

    // ── Shared immutable ──
    plugin_registry: Arc<PluginRegistry>,
    config_cache: ConfigCache,
    #[allow(dead_code)]
    config: Arc<StargateConfig>,
}

impl ProxyWorker {
    pub fn new(
        router: Arc<Router>,
        balancer: Arc<Balancer>,
        plugin_registry: Arc<PluginRegistry>,
        config_cache: ConfigCache,
        config: Arc<StargateConfig>,
    ) -> Self {
        let mut worker = Self {
            router_version: router.version(),
            router,
            balancer,
            pipeline_cache: HashMap::with_capacity(64),
            services: HashMap::new(),
            plugin_configs: HashMap::new(),
            consumer_keys: HashMap::new(),
            consumer_basic: HashMap::new(),
            plugin_registry,
            config_cache,
            config,
        };
        worker.snapshot_from_cache();
        worker
    }

    /// Check for config updates. Called once per accept loop iteration.
    #[inline]
    pub fn maybe_update_router(&mut self, new_router: Arc<Router>) {
        let v = new_router.version();
        if v != self.router_version {
            self.router = new_router;
            self.router_version = v;
            self.pipeline_cache.clear();
            self.snapshot_from_cache();
        }
    }

    /// Cold path: copy DashMap state into thread-local HashMaps.
    fn snapshot_from_cache(&mut self) {
        self.services.clear();
        for entry in self.config_cache.services.iter() {
            self.services.insert(entry.key().clone(), entry.value().clone());
        }

        self.plugin_configs.clear();
        for entry in self.config_cache.plugin_configs.iter() {
            self.plugin_configs.insert(entry.key().clone(), entry.value().clone());
        }

        self.consumer_keys.clear();
        self.consumer_basic.clear();
        for entry in self.config_cache.consumers.iter() {
            let consumer = entry.value();
            if let Some(cfg) = consumer.plugins.get("key-auth") {
                if let Some(key) = cfg.get("key").and_then(|v| v.as_str()) {
                    self.consumer_keys.insert(key.to_string(), consumer.username.clone());
                }
            }
            if let Some(cfg) = consumer.plugins.get("basic-auth") {
                if let (Some(u), Some(p)) = (
                    cfg.get("username").and_then(|v| v.as_str()),
                    cfg.get("password").and_then(|v| v.as_str()),
                ) {
                    self.consumer_basic
                        .insert((u.to_string(), p.to_string()), consumer.username.clone());
                }
            }
        }
    }

    /// Collect all unique upstream addresses known to the balancer (for pool
    /// pre-warming).
    pub fn upstream_addresses(&self) -> Vec<String> {
        let mut addrs = Vec::new();
        for entry in self.config_cache.upstreams.iter() {
            for target in &entry.value().targets {
                let addr = target.addr();
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
        addrs
    }

    /// Hot path: process request. Returns what to do next.
    ///
    /// Takes &str header references (zero-copy from read buffer).
    /// No DashMap access. No unnecessary allocations.
    #[inline]
    pub fn handle_request(
        &mut self,
        method: &str,
        path: &str,
        host: Option<&str>,
        headers: &[(&str, &str)],
        client_ip: &str,
    ) -> RequestResult {
        let (req_path, req_query) = match path.find('?') {
            Some(pos) => (&path[..pos], &path[pos + 1..]),
            None => (path, ""),
        };
        let header_map: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_string()))
            .collect();
        let query_map = parse_query(req_query);

        let matched = match self.router.match_route(method, req_path, host, &header_map, &query_map) {
            Some(m) => m,
            None => return RequestResult::Static(RESP_404),
        };
        let route_id = matched.route_id.to_string();
        let upstream_id = matched.upstream_id.to_string();

        let (pipeline, has_auth) = self.get_or_build_pipeline(&route_id);

        // ── FAST PATH: no plugins → resolve target and proxy directly ──
        if pipeline.plugin_count() == 0 {
            return match self.balancer.select(&upstream_id, client_ip) {
                Some(target) => RequestResult::Proxy {
                    upstream_addr: target.addr(),
                    upstream_path: path.to_string(),
                },
                None => RequestResult::Static(RESP_502),
            };
        }

        let mut ctx = PluginContext::new(
            route_id,
            client_ip.to_string(),
            method.to_string(),
            path.to_string(),
            header_map,
        );

        // Execute Rewrite + Access phases
        for phase in [Phase::Rewrite, Phase::Access] {
            match pipeline.execute_phase(phase, &mut ctx) {
                PluginResult::Continue => {}
                PluginResult::Response { status, headers, body } => {
                    return RequestResult::PluginResponse {
                        status,
                        headers,
                        body: body.unwrap_or_default(),
                    };
                }
                PluginResult::Error(msg) => {
                    tracing::error!(error = %msg, "plugin error during request phases");
                    return RequestResult::Static(RESP_502);
                }
            }
        }

        // Consumer resolution — auth plugins stash credentials in `ctx.vars`
        // (jwt-auth is the exception and sets `ctx.consumer` itself).
        if has_auth && ctx.consumer.is_none() {
            if let Some(key) = ctx.vars.get("_key_auth_key").and_then(|v| v.as_str()) {
                match self.consumer_keys.get(key) {
                    Some(username) => ctx.consumer = Some(username.clone()),
                    None => return RequestResult::Static(RESP_401_INVALID),
                }
            } else if let (Some(user), Some(pass)) = (
                ctx.vars.get("_basic_auth_user").and_then(|v| v.as_str()),
                ctx.vars.get("_basic_auth_pass").and_then(|v| v.as_str()),
            ) {
                let key = (user.to_string(), pass.to_string());
                match self.consumer_basic.get(&key) {
                    Some(username) => ctx.consumer = Some(username.clone()),
                    None => return RequestResult::Static(RESP_401_INVALID),
                }
            }
        }

        // Before-proxy phase
        match pipeline.execute_phase(Phase::BeforeProxy, &mut ctx) {
            PluginResult::Continue => {}
            PluginResult::Response { status, headers, body } => {
                return RequestResult::PluginResponse {
                    status,
                    headers,
                    body: body.unwrap_or_default(),
                };
            }
            PluginResult::Error(msg) => {
                tracing::error!(error = %msg, "plugin error during before_proxy");
                return RequestResult::Static(RESP_502);
            }
        }

        match self.balancer.select(&upstream_id, client_ip) {
            Some(target) => RequestResult::Proxy {
                upstream_addr: target.addr(),
                upstream_path: ctx.request_path,
            },
            None => RequestResult::Static(RESP_502),
        }
    }

    /// Merge plugin configuration a route pulls in — from its `service_id`,
    /// its `plugin_config_id`, then its own `plugins` — route wins on
    /// conflict, build the phase-bucketed pipeline, and cache it.
    fn get_or_build_pipeline(&mut self, route_id: &str) -> (Arc<PluginPipeline>, bool) {
        if let Some((pipeline, has_auth)) = self.pipeline_cache.get(route_id) {
            return (Arc::clone(pipeline), *has_auth);
        }

        let mut merged: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(route) = self.router.get_route(route_id) {
            if let Some(ref svc_id) = route.service_id {
                if let Some(svc) = self.services.get(svc_id) {
                    for (name, config) in &svc.plugins {
                        merged.insert(name.clone(), config.clone());
                    }
                }
            }
            if let Some(ref pc_id) = route.plugin_config_id {
                if let Some(pc) = self.plugin_configs.get(pc_id) {
                    for (name, config) in &pc.plugins {
                        merged.insert(name.clone(), config.clone());
                    }
                }
            }
            for (name, config) in &route.plugins {
                merged.insert(name.clone(), config.clone());
            }
        }

        let mut has_auth = false;
        let mut phases: HashMap<Phase, Vec<Box<dyn stargate_plugin::plugin::PluginInstance>>> =
            HashMap::new();
        for (name, config) in &merged {
            if AUTH_PLUGINS.contains(&name.as_str()) {
                has_auth = true;
            }
            let Some(factory) = self.plugin_registry.get(name) else {
                tracing::warn!(plugin = %name, route_id, "plugin not registered, skipping");
                continue;
            };
            for phase in factory.phases() {
                match factory.configure(config) {
                    Ok(instance) => phases.entry(*phase).or_default().push(instance),
                    Err(e) => {
                        tracing::error!(plugin = %name, error = %e, "failed to configure plugin");
                    }
                }
            }
        }

        let pipeline = Arc::new(PluginPipeline::new(phases));
        self.pipeline_cache
            .insert(route_id.to_string(), (Arc::clone(&pipeline), has_auth));
        (pipeline, has_auth)
    }
}

fn parse_query(qs: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if qs.is_empty() {
        return map;
    }
    for pair in qs.split('&') {
        match pair.split_once('=') {
            Some((k, v)) => {
                map.insert(k.to_string(), v.to_string());
            }
            None if !pair.is_empty() => {
                map.insert(pair.to_string(), String::new());
            }
            None => {}
        }
    }
    map
}

// ── Request result ────────────────────────────────────────────

#[derive(Debug)]
pub enum RequestResult {
    /// Proxy to upstream at this address, forwarding this (possibly
    /// rewrite-plugin-modified) path.
    Proxy { upstream_addr: String, upstream_path: String },
    /// Send a pre-built static response (zero alloc).
    Static(&'static [u8]),
    /// Send a plugin-generated response.
    PluginResponse {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

// ── Connection pool ───────────────────────────────────────────

/// Thread-local upstream connection pool.
/// Avoids TCP handshake on every request (saves ~0.5-2ms RTT).
///
/// Pre-warmed at startup: each worker opens N connections to every
/// known upstream before accepting any traffic.
pub struct ConnPool {
    pools: HashMap<String, VecDeque<TcpStream>>,
    max_idle: usize,
}

impl ConnPool {
    pub fn new(max_idle_per_host: usize) -> Self {
        Self {
            pools: HashMap::with_capacity(16),
            max_idle: max_idle_per_host,
        }
    }

    #[inline]
    pub fn take(&mut self, addr: &str) -> Option<TcpStream> {
        self.pools.get_mut(addr).and_then(|q| q.pop_front())
    }

    #[inline]
    pub fn put(&mut self, addr: String, stream: TcpStream) {
        let queue = self.pools.entry(addr).or_insert_with(|| VecDeque::with_capacity(self.max_idle));
        if queue.len() < self.max_idle {
            queue.push_back(stream);
        }
        // else: drop stream (closes fd)
    }

    /// Pre-warm connection pool: open `count` connections to each addr.
    /// Called once at worker startup, before accepting any traffic.
    pub async fn warm(&mut self, addrs: &[String], count: usize) {
        for addr in addrs {
            let target = count.min(self.max_idle);
            let queue = self.pools.entry(addr.clone()).or_insert_with(|| VecDeque::with_capacity(target));
            for _ in 0..target {
                match TcpStream::connect(addr.as_str()).await {
                    Ok(stream) => {
                        // Set TCP_NODELAY on pooled connections
                        let _ = stream.set_nodelay(true);
                        queue.push_back(stream);
                    }
                    Err(e) => {
                        tracing::warn!(addr = %addr, error = %e, "Pool pre-warm connect failed");
                        break; // upstream not yet up — stop trying this addr
                    }
                }
            }
            if !queue.is_empty() {
                tracing::info!(addr = %addr, conns = queue.len(), "Pool pre-warmed");
            }
        }
    }
}

// ── Response building helpers ─────────────────────────────────

/// Build HTTP response into a buffer (no format! overhead).
pub fn build_response(buf: &mut Vec<u8>, status: u16, headers: &[(String, String)], body: &[u8]) {
    buf.clear();
    buf.extend_from_slice(b"HTTP/1.1 ");
    let mut itoa_buf = itoa::Buffer::new();
    buf.extend_from_slice(itoa_buf.format(status).as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(status_text(status).as_bytes());
    buf.extend_from_slice(b"\r\ncontent-length: ");
    buf.extend_from_slice(itoa_buf.format(body.len()).as_bytes());
    buf.extend_from_slice(b"\r\nconnection: keep-alive\r\n");
    for (k, v) in headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(body);
}

/// Build upstream HTTP request into a buffer. Zero-copy from &str refs.
pub fn build_upstream_request(
    buf: &mut Vec<u8>,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) {
    buf.clear();
    buf.extend_from_slice(method.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("keep-alive")
            || name.eq_ignore_ascii_case("transfer-encoding")
            || name.eq_ignore_ascii_case("upgrade")
        {
            continue;
        }
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"connection: keep-alive\r\n");
    if !body.is_empty() {
        buf.extend_from_slice(b"content-length: ");
        let mut itoa_buf = itoa::Buffer::new();
        buf.extend_from_slice(itoa_buf.format(body.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
    if !body.is_empty() {
        buf.extend_from_slice(body);
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

use crate::cache::ConfigCache;
use crate::source::{ConfigSource, EventKind, WatchEvent};
use serde::de::DeserializeOwned;
use stargate_core::balancer::Balancer;
use stargate_core::consumer::Consumer;
use stargate_core::plugin_config::PluginConfig;
use stargate_core::route::Route;
use stargate_core::service::Service;
use stargate_core::ssl::SslCert;
use stargate_core::upstream::Upstream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The six watched key prefixes. `plugins` is the wire name spec.md's
/// configuration source contract uses; it maps onto the `plugin_configs`
/// entity and cache bucket (see `schema::Schema::plugin_configs_prefix`).
/// `services`, `consumers`, and `ssl` aren't named by the base key-space
/// but are reconciled the same way since the data model (Service/Consumer/
/// PluginConfig resolution) depends on the cache holding current copies.
const ROUTES: &str = "routes";
const UPSTREAMS: &str = "upstreams";
const PLUGINS: &str = "plugin_configs";
const SERVICES: &str = "services";
const CONSUMERS: &str = "consumers";
const SSL: &str = "ssl";

const ALL_PREFIXES: [&str; 6] = [ROUTES, UPSTREAMS, PLUGINS, SERVICES, CONSUMERS, SSL];

/// Drives the route table, load balancer, and shared config cache from a
/// [`ConfigSource`]: an initial full load, live watch-driven incremental
/// updates, and a periodic full reconcile as a backstop against missed
/// watch events.
pub struct Reconciler<S: ConfigSource + 'static> {
    source: Arc<S>,
    cache: ConfigCache,
    router: Arc<stargate_core::router::Router>,
    balancer: Arc<Balancer>,
    on_plugin_change: Arc<dyn Fn() + Send + Sync>,
    full_reconcile_interval: Duration,
}

impl<S: ConfigSource + 'static> Reconciler<S> {
    pub fn new(
        source: Arc<S>,
        cache: ConfigCache,
        router: Arc<stargate_core::router::Router>,
        balancer: Arc<Balancer>,
        on_plugin_change: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            source,
            cache,
            router,
            balancer,
            on_plugin_change,
            full_reconcile_interval: Duration::from_secs(30),
        }
    }

    pub fn with_full_reconcile_interval(mut self, interval: Duration) -> Self {
        self.full_reconcile_interval = interval;
        self
    }

    /// Initial load, then start watching every prefix and spawn the
    /// periodic full-reconcile task. Returns once watches are established;
    /// both the watch callbacks and the periodic task keep running in the
    /// background for the lifetime of the process.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.full_reconcile().await?;

        for prefix in ALL_PREFIXES {
            let this = self.clone();
            self.source
                .watch(
                    prefix,
                    Box::new(move |event| this.handle_event(prefix, event)),
                )
                .await?;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.full_reconcile_interval);
            ticker.tick().await; // first tick fires immediately; already reconciled above
            loop {
                ticker.tick().await;
                if let Err(e) = this.full_reconcile().await {
                    error!(error = %e, "periodic full reconcile failed");
                }
            }
        });

        Ok(())
    }

    /// `list()` every prefix and replace the route table / balancer / cache
    /// wholesale. Recovery path for watch events missed during a network
    /// blip. Per-target health set by passive health checking is preserved
    /// since `Balancer::replace_all` diffs by host:port, not by full decode.
    async fn full_reconcile(&self) -> anyhow::Result<()> {
        let routes = self.decode_all::<Route>(ROUTES).await?;
        self.router.replace_all(routes.values().cloned().collect())?;
        for route in &routes {
            self.cache.routes.insert(route.0.clone(), route.1.clone());
        }

        let upstreams = self.decode_all::<Upstream>(UPSTREAMS).await?;
        self.balancer.replace_all(upstreams.values().cloned().collect());
        for upstream in &upstreams {
            self.cache.upstreams.insert(upstream.0.clone(), upstream.1.clone());
        }

        for (id, svc) in self.decode_all::<Service>(SERVICES).await? {
            self.cache.services.insert(id, svc);
        }
        for (id, consumer) in self.decode_all::<Consumer>(CONSUMERS).await? {
            self.cache.consumers.insert(id, consumer);
        }
        for (id, cert) in self.decode_all::<SslCert>(SSL).await? {
            self.cache.ssl_certs.insert(id, cert);
        }
        for (id, plugin_config) in self.decode_all::<PluginConfig>(PLUGINS).await? {
            self.cache.plugin_configs.insert(id, plugin_config);
        }

        info!(stats = %self.cache.stats(), "full reconcile complete");
        (self.on_plugin_change)();
        Ok(())
    }

    async fn decode_all<T: DeserializeOwned + Clone>(
        &self,
        prefix: &str,
    ) -> anyhow::Result<std::collections::HashMap<String, T>> {
        let raw = self.source.list(prefix).await?;
        let mut out = std::collections::HashMap::new();
        for (key, value) in raw {
            let id = id_from_key(prefix, &key);
            match serde_json::from_slice::<T>(&value) {
                Ok(decoded) => {
                    out.insert(id, decoded);
                }
                Err(e) => error!(key = %key, error = %e, "failed to decode config entry, dropping"),
            }
        }
        Ok(out)
    }

    fn handle_event(&self, prefix: &str, event: WatchEvent) {
        let id = id_from_key(prefix, &event.key);
        match (prefix, event.kind) {
            (ROUTES, EventKind::Put) => match serde_json::from_slice::<Route>(&event.value) {
                Ok(route) => {
                    if let Err(e) = self.router.update_route(route.clone()) {
                        error!(id = %id, error = %e, "failed to update route");
                        return;
                    }
                    self.cache.routes.insert(id, route);
                }
                Err(e) => error!(id = %id, error = %e, "failed to decode route, dropping event"),
            },
            (ROUTES, EventKind::Delete) => {
                if let Err(e) = self.router.remove_route(&id, true) {
                    warn!(id = %id, error = %e, "failed to remove route");
                }
                self.cache.routes.remove(&id);
            }
            (UPSTREAMS, EventKind::Put) => match serde_json::from_slice::<Upstream>(&event.value) {
                Ok(upstream) => {
                    self.balancer.update_upstream(upstream.clone());
                    self.cache.upstreams.insert(id, upstream);
                }
                Err(e) => error!(id = %id, error = %e, "failed to decode upstream, dropping event"),
            },
            (UPSTREAMS, EventKind::Delete) => {
                self.balancer.remove_upstream(&id);
                self.cache.upstreams.remove(&id);
            }
            (PLUGINS, _) => {
                match event.kind {
                    EventKind::Put => self.cache.apply_change(
                        "plugin_configs",
                        &id,
                        Some(&String::from_utf8_lossy(&event.value)),
                    ),
                    EventKind::Delete => self.cache.apply_change("plugin_configs", &id, None),
                }
                (self.on_plugin_change)();
            }
            (SERVICES, kind) => self.apply_cache_only("services", &id, kind, &event.value),
            (CONSUMERS, kind) => self.apply_cache_only("consumers", &id, kind, &event.value),
            (SSL, kind) => self.apply_cache_only("ssl", &id, kind, &event.value),
            _ => warn!(prefix = %prefix, "unrecognized config prefix in watch event"),
        }
    }

    fn apply_cache_only(&self, resource_type: &str, id: &str, kind: EventKind, value: &[u8]) {
        match kind {
            EventKind::Put => {
                self.cache.apply_change(resource_type, id, Some(&String::from_utf8_lossy(value)))
            }
            EventKind::Delete => self.cache.apply_change(resource_type, id, None),
        }
    }
}

fn id_from_key(prefix: &str, key: &str) -> String {
    key.trim_start_matches(prefix).trim_start_matches('/').to_string()
}

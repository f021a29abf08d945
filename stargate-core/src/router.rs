use crate::matcher::CompiledPredicate;
use crate::route::Route;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Thread-safe router performing full five-dimension conjunction matching
/// (host/path/method/header/query) with explicit priority-then-FIFO
/// tiebreak, in route-table order (`O(R)` per request, `R` = route count).
///
/// `inner` holds the compiled, immutable snapshot workers read from;
/// `routes` is the DashMap source of truth mutated by the admin/reconciler
/// path. A route's entry into the compiled order is stable across updates:
/// the first time a route id is seen it is assigned a monotonically
/// increasing sequence number, which survives later `add_route` calls that
/// replace the same id (this is what gives the FIFO tiebreak its meaning —
/// "first registered", not "most recently touched").
pub struct Router {
    inner: arc_swap::ArcSwap<CompiledRouter>,
    routes: DashMap<String, RouteEntry>,
    next_seq: AtomicU64,
    version: AtomicU64,
}

struct RouteEntry {
    route: Route,
    seq: u64,
}

struct CompiledEntry {
    route_id: Arc<str>,
    upstream_id: Arc<str>,
    priority: i64,
    seq: u64,
    predicate: CompiledPredicate,
}

struct CompiledRouter {
    /// Sorted by (priority desc, seq asc) once at rebuild time so matching
    /// is a single linear scan that returns the first hit.
    entries: Vec<CompiledEntry>,
}

/// Result of a route match.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route_id: Arc<str>,
    pub upstream_id: Arc<str>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: arc_swap::ArcSwap::new(Arc::new(CompiledRouter { entries: Vec::new() })),
            routes: DashMap::new(),
            next_seq: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Add a new route. Fails if a route with the same id already exists —
    /// use `update_route` to replace one.
    pub fn add_route(&self, route: Route) -> anyhow::Result<()> {
        if self.routes.contains_key(&route.id) {
            anyhow::bail!("route already exists: {}", route.id);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!(route_id = %route.id, "adding route");
        self.routes.insert(route.id.clone(), RouteEntry { route, seq });
        self.rebuild()
    }

    /// Insert-or-replace a route, preserving its original sequence number
    /// (and hence FIFO tiebreak position) if it already existed.
    pub fn update_route(&self, route: Route) -> anyhow::Result<()> {
        let seq = self
            .routes
            .get(&route.id)
            .map(|e| e.seq)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
        info!(route_id = %route.id, "updating route");
        self.routes.insert(route.id.clone(), RouteEntry { route, seq });
        self.rebuild()
    }

    /// Remove a route by id. Errors if it does not exist unless
    /// `allow_missing` is set, matching the two conformant behaviors spec.md
    /// §4.2 allows for deleting an unknown id.
    pub fn remove_route(&self, route_id: &str, allow_missing: bool) -> anyhow::Result<()> {
        if self.routes.remove(route_id).is_none() && !allow_missing {
            anyhow::bail!("route not found: {}", route_id);
        }
        info!(route_id = %route_id, "removing route");
        self.rebuild()
    }

    pub fn get_route(&self, route_id: &str) -> Option<Route> {
        self.routes.get(route_id).map(|e| e.route.clone())
    }

    pub fn all_routes(&self) -> Vec<Route> {
        self.routes.iter().map(|e| e.route.clone()).collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Match an incoming request against registered routes. `upstream_id` is
    /// resolved from whatever the route currently names, but never validated
    /// to exist here — an unresolved upstream is an unhealthy-target
    /// condition at select time (see DESIGN.md open question #2), not a
    /// routing failure.
    #[inline]
    pub fn match_route(
        &self,
        method: &str,
        path: &str,
        host: Option<&str>,
        headers: &HashMap<String, String>,
        query: &HashMap<String, String>,
    ) -> Option<RouteMatch> {
        let compiled = self.inner.load();
        for entry in compiled.entries.iter() {
            if entry.predicate.matches(host, path, method, headers, query) {
                return Some(RouteMatch {
                    route_id: Arc::clone(&entry.route_id),
                    upstream_id: Arc::clone(&entry.upstream_id),
                });
            }
        }
        None
    }

    /// Rebuild the compiled, sorted snapshot from current routes. A route
    /// whose predicate fails to compile (e.g. invalid regex) is skipped and
    /// logged rather than poisoning the whole table.
    pub fn rebuild(&self) -> anyhow::Result<()> {
        let mut source: Vec<RouteSnapshot> = self
            .routes
            .iter()
            .map(|e| RouteSnapshot {
                route: e.route.clone(),
                seq: e.seq,
            })
            .collect();

        // priority desc, then seq asc (earlier-registered wins ties)
        source.sort_by(|a, b| b.route.priority.cmp(&a.route.priority).then(a.seq.cmp(&b.seq)));

        let mut entries = Vec::with_capacity(source.len());
        for snap in source {
            match CompiledPredicate::compile(&snap.route) {
                Ok(predicate) => entries.push(CompiledEntry {
                    route_id: Arc::from(snap.route.id.as_str()),
                    upstream_id: Arc::from(snap.route.upstream_id.as_str()),
                    priority: snap.route.priority,
                    seq: snap.seq,
                    predicate,
                }),
                Err(err) => {
                    warn!(route_id = %snap.route.id, error = %err, "failed to compile route predicate, skipping");
                }
            }
        }

        let count = entries.len();
        self.inner.store(Arc::new(CompiledRouter { entries }));
        self.version.fetch_add(1, Ordering::Release);
        info!(count, "router rebuilt");
        Ok(())
    }

    /// Replace all routes atomically (used during full config sync).
    pub fn replace_all(&self, routes: Vec<Route>) -> anyhow::Result<()> {
        let existing: HashMap<String, u64> =
            self.routes.iter().map(|e| (e.key().clone(), e.seq)).collect();
        self.routes.clear();
        for route in routes {
            let seq = existing
                .get(&route.id)
                .copied()
                .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
            self.routes.insert(route.id.clone(), RouteEntry { route, seq });
        }
        self.rebuild()
    }
}

struct RouteSnapshot {
    route: Route,
    seq: u64,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

// silence "field never read" for `priority` — kept for debuggability/future
// secondary indexing, intentionally unused in the linear-scan matcher.
#[allow(dead_code)]
fn _assert_fields_used(e: &CompiledEntry) -> i64 {
    e.priority
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{MatchType, PathRule, RouteRules};
    use chrono::Utc;

    fn route(id: &str, path: &str, priority: i64) -> Route {
        Route {
            id: id.into(),
            name: id.into(),
            rules: RouteRules {
                paths: vec![PathRule { match_type: MatchType::Prefix, value: path.into() }],
                ..Default::default()
            },
            upstream_id: "u1".into(),
            service_id: None,
            plugin_config_id: None,
            plugins: Default::default(),
            priority,
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn higher_priority_wins_on_overlap() {
        let r = Router::new();
        r.add_route(route("generic", "/api", 0)).unwrap();
        r.add_route(route("specific", "/api/v1", 10)).unwrap();

        let m = r
            .match_route("GET", "/api/v1/users", None, &Default::default(), &Default::default())
            .unwrap();
        assert_eq!(m.route_id.as_ref(), "specific");
    }

    #[test]
    fn fifo_tiebreak_on_equal_priority() {
        let r = Router::new();
        r.add_route(route("first", "/api", 5)).unwrap();
        r.add_route(route("second", "/api", 5)).unwrap();

        let m = r
            .match_route("GET", "/api/thing", None, &Default::default(), &Default::default())
            .unwrap();
        assert_eq!(m.route_id.as_ref(), "first");
    }

    #[test]
    fn update_preserves_fifo_position() {
        let r = Router::new();
        r.add_route(route("first", "/api", 5)).unwrap();
        r.add_route(route("second", "/api", 5)).unwrap();
        // re-register "first" with a changed path but same priority: it must
        // still win the tiebreak against "second" because its seq predates it.
        r.update_route(route("first", "/api", 5)).unwrap();

        let m = r
            .match_route("GET", "/api/thing", None, &Default::default(), &Default::default())
            .unwrap();
        assert_eq!(m.route_id.as_ref(), "first");
    }

    #[test]
    fn add_fails_on_duplicate_id() {
        let r = Router::new();
        r.add_route(route("r1", "/a", 0)).unwrap();
        assert!(r.add_route(route("r1", "/b", 0)).is_err());
    }

    #[test]
    fn remove_errors_on_missing_unless_allowed() {
        let r = Router::new();
        assert!(r.remove_route("nope", false).is_err());
        assert!(r.remove_route("nope", true).is_ok());
    }

    #[test]
    fn no_match_returns_none() {
        let r = Router::new();
        r.add_route(route("r1", "/api", 0)).unwrap();
        assert!(r
            .match_route("GET", "/other", None, &Default::default(), &Default::default())
            .is_none());
    }
}

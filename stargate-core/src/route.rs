use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Match type for path/header/query predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Prefix,
    Regex,
    Exists,
    NotExists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderRule {
    pub name: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRule {
    pub name: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub value: Option<String>,
}

/// The five-dimension conjunction predicate a request must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteRules {
    /// Exact hostnames. Empty means "any host".
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Paths the route matches. A route with no path rules matches any path.
    #[serde(default)]
    pub paths: Vec<PathRule>,

    /// HTTP methods. Empty means "any method".
    #[serde(default)]
    pub methods: Vec<String>,

    /// Header predicates, all of which must hold.
    #[serde(default)]
    pub headers: Vec<HeaderRule>,

    /// Query-string predicates, all of which must hold. This is the only
    /// supported representation of query matching.
    #[serde(default)]
    pub query: Vec<QueryRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub rules: RouteRules,

    pub upstream_id: String,

    /// Bundle of upstream+plugins this route pulls in. Route-level fields
    /// below take precedence over whatever the service also sets.
    #[serde(default)]
    pub service_id: Option<String>,

    /// Reusable plugin set this route pulls in; merged under `plugins`,
    /// which wins on conflict.
    #[serde(default)]
    pub plugin_config_id: Option<String>,

    /// Plugins configured directly on this route.
    #[serde(default)]
    pub plugins: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Route {
    /// Whether this route's method list allows `method` (empty list = any).
    pub fn method_allowed(&self, method: &str) -> bool {
        self.rules.methods.is_empty()
            || self
                .rules
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Route {
        Route {
            id: "r1".into(),
            name: "checkout".into(),
            rules: RouteRules {
                hosts: vec!["api.example.com".into()],
                paths: vec![PathRule { match_type: MatchType::Prefix, value: "/checkout".into() }],
                methods: vec!["GET".into(), "POST".into()],
                headers: vec![],
                query: vec![],
            },
            upstream_id: "u1".into(),
            service_id: None,
            plugin_config_id: None,
            plugins: HashMap::new(),
            priority: 10,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn method_allowed_matches_case_insensitively() {
        let r = sample();
        assert!(r.method_allowed("get"));
        assert!(r.method_allowed("POST"));
        assert!(!r.method_allowed("DELETE"));
    }

    #[test]
    fn empty_method_list_allows_any() {
        let mut r = sample();
        r.rules.methods.clear();
        assert!(r.method_allowed("DELETE"));
    }

    #[test]
    fn route_round_trips_through_json() {
        let r = sample();
        let json = serde_json::to_string(&r).unwrap();
        let back: Route = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.rules.hosts, r.rules.hosts);
    }
}

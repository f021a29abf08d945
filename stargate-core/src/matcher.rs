//! Predicate evaluation for the five dimensions a [`crate::route::Route`] can
//! constrain: host, path, method, header, query. Each predicate is compiled
//! once (at route-table rebuild time) and evaluated per request without
//! further allocation where practical.

use crate::route::{HeaderRule, MatchType, PathRule, QueryRule, Route};
use regex::Regex;
use std::collections::HashMap;

/// A compiled path predicate. Regex patterns are compiled once and reused;
/// an invalid pattern makes the route uncompilable (surfaced at rebuild time,
/// not per-request).
pub enum CompiledPath {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl CompiledPath {
    pub fn compile(rule: &PathRule) -> Result<Self, regex::Error> {
        Ok(match rule.match_type {
            MatchType::Exact => CompiledPath::Exact(rule.value.clone()),
            MatchType::Prefix => CompiledPath::Prefix(rule.value.clone()),
            MatchType::Regex => CompiledPath::Regex(Regex::new(&rule.value)?),
            // Exists/NotExists are not meaningful for paths; treat as prefix "/"
            // so a route is never silently unreachable because of a mistyped
            // rule kind.
            MatchType::Exists | MatchType::NotExists => CompiledPath::Prefix("/".into()),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            CompiledPath::Exact(v) => path == v,
            CompiledPath::Prefix(v) => path.starts_with(v.as_str()),
            // Unanchored match against the full path unless the pattern
            // supplies its own `^`/`$`. See DESIGN.md "Regex path anchoring".
            CompiledPath::Regex(re) => re.is_match(path),
        }
    }
}

pub struct CompiledHeaderRule {
    pub name: String,
    pub kind: HeaderPredicateKind,
}

pub enum HeaderPredicateKind {
    Exact(String),
    Regex(Regex),
    Exists,
    NotExists,
}

impl CompiledHeaderRule {
    pub fn compile(rule: &HeaderRule) -> Result<Self, regex::Error> {
        let kind = match rule.match_type {
            MatchType::Exact | MatchType::Prefix => {
                HeaderPredicateKind::Exact(rule.value.clone().unwrap_or_default())
            }
            MatchType::Regex => {
                HeaderPredicateKind::Regex(Regex::new(rule.value.as_deref().unwrap_or(""))?)
            }
            MatchType::Exists => HeaderPredicateKind::Exists,
            MatchType::NotExists => HeaderPredicateKind::NotExists,
        };
        Ok(CompiledHeaderRule { name: rule.name.to_ascii_lowercase(), kind })
    }

    pub fn matches(&self, headers: &HashMap<String, String>) -> bool {
        let found = headers.get(&self.name);
        match (&self.kind, found) {
            (HeaderPredicateKind::Exists, v) => v.is_some(),
            (HeaderPredicateKind::NotExists, v) => v.is_none(),
            (HeaderPredicateKind::Exact(want), Some(got)) => got == want,
            (HeaderPredicateKind::Regex(re), Some(got)) => re.is_match(got),
            (_, None) => false,
        }
    }
}

pub struct CompiledQueryRule {
    pub name: String,
    pub kind: HeaderPredicateKind,
}

impl CompiledQueryRule {
    pub fn compile(rule: &QueryRule) -> Result<Self, regex::Error> {
        let kind = match rule.match_type {
            MatchType::Exact | MatchType::Prefix => {
                HeaderPredicateKind::Exact(rule.value.clone().unwrap_or_default())
            }
            MatchType::Regex => {
                HeaderPredicateKind::Regex(Regex::new(rule.value.as_deref().unwrap_or(""))?)
            }
            MatchType::Exists => HeaderPredicateKind::Exists,
            MatchType::NotExists => HeaderPredicateKind::NotExists,
        };
        Ok(CompiledQueryRule { name: rule.name.clone(), kind })
    }

    pub fn matches(&self, query: &HashMap<String, String>) -> bool {
        let found = query.get(&self.name);
        match (&self.kind, found) {
            (HeaderPredicateKind::Exists, v) => v.is_some(),
            (HeaderPredicateKind::NotExists, v) => v.is_none(),
            (HeaderPredicateKind::Exact(want), Some(got)) => got == want,
            (HeaderPredicateKind::Regex(re), Some(got)) => re.is_match(got),
            (_, None) => false,
        }
    }
}

/// A route's full predicate, compiled once at rebuild time.
pub struct CompiledPredicate {
    pub hosts: Vec<String>,
    pub paths: Vec<CompiledPath>,
    pub methods: Vec<String>,
    pub headers: Vec<CompiledHeaderRule>,
    pub query: Vec<CompiledQueryRule>,
}

impl CompiledPredicate {
    pub fn compile(route: &Route) -> Result<Self, regex::Error> {
        Ok(CompiledPredicate {
            hosts: route.rules.hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
            paths: route
                .rules
                .paths
                .iter()
                .map(CompiledPath::compile)
                .collect::<Result<_, _>>()?,
            methods: route.rules.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            headers: route
                .rules
                .headers
                .iter()
                .map(CompiledHeaderRule::compile)
                .collect::<Result<_, _>>()?,
            query: route
                .rules
                .query
                .iter()
                .map(CompiledQueryRule::compile)
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn matches(
        &self,
        host: Option<&str>,
        path: &str,
        method: &str,
        headers: &HashMap<String, String>,
        query: &HashMap<String, String>,
    ) -> bool {
        if !self.hosts.is_empty() {
            let host_matches = host
                .map(|h| h.to_ascii_lowercase())
                .is_some_and(|h| self.hosts.contains(&h));
            if !host_matches {
                return false;
            }
        }

        if !self.paths.is_empty() && !self.paths.iter().any(|p| p.matches(path)) {
            return false;
        }

        if !self.methods.is_empty() {
            let m = method.to_ascii_uppercase();
            if !self.methods.contains(&m) {
                return false;
            }
        }

        if !self.headers.iter().all(|h| h.matches(headers)) {
            return false;
        }

        if !self.query.iter().all(|q| q.matches(query)) {
            return false;
        }

        true
    }
}

use chrono::Utc;
use stargate_core::route::{MatchType, PathRule, Route, RouteRules};
use stargate_core::router::Router;
use std::collections::HashMap;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_route(id: &str, path: &str, methods: Vec<&str>) -> Route {
    Route {
        id: id.to_string(),
        name: id.to_string(),
        rules: RouteRules {
            paths: vec![PathRule { match_type: MatchType::Prefix, value: path.to_string() }],
            methods: methods.into_iter().map(String::from).collect(),
            ..Default::default()
        },
        upstream_id: "u1".into(),
        service_id: None,
        plugin_config_id: None,
        plugins: HashMap::new(),
        priority: 0,
        metadata: HashMap::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn test_route_with_host(id: &str, path: &str, host: &str) -> Route {
    let mut route = test_route(id, path, vec![]);
    route.rules.hosts = vec![host.to_string()];
    route
}

// =============================================================================
// Basic Router Tests
// =============================================================================

#[test]
fn test_router_new() {
    let router = Router::new();
    assert_eq!(router.route_count(), 0);
}

#[test]
fn test_router_default() {
    let router = Router::default();
    assert_eq!(router.route_count(), 0);
}

#[test]
fn test_add_single_route() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();
    assert_eq!(router.route_count(), 1);
}

#[test]
fn test_add_multiple_routes() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();
    router.add_route(test_route("r2", "/api/posts", vec!["GET"])).unwrap();
    router.add_route(test_route("r3", "/api/comments", vec!["POST"])).unwrap();
    assert_eq!(router.route_count(), 3);
}

#[test]
fn test_add_fails_on_duplicate_id() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec![])).unwrap();
    assert!(router.add_route(test_route("r1", "/api/other", vec![])).is_err());
}

#[test]
fn test_remove_route() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();
    router.add_route(test_route("r2", "/api/posts", vec!["GET"])).unwrap();
    assert_eq!(router.route_count(), 2);

    router.remove_route("r1", false).unwrap();
    assert_eq!(router.route_count(), 1);
}

#[test]
fn test_remove_nonexistent_route_errors_unless_allowed() {
    let router = Router::new();
    assert!(router.remove_route("nonexistent", false).is_err());
    assert!(router.remove_route("nonexistent", true).is_ok());
    assert_eq!(router.route_count(), 0);
}

#[test]
fn test_get_route() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();

    let route = router.get_route("r1");
    assert!(route.is_some());
    assert_eq!(route.unwrap().rules.paths[0].value, "/api/users");

    assert!(router.get_route("r2").is_none());
}

#[test]
fn test_all_routes() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec![])).unwrap();
    router.add_route(test_route("r2", "/api/posts", vec![])).unwrap();

    let all = router.all_routes();
    assert_eq!(all.len(), 2);
}

// =============================================================================
// Route Matching Tests
// =============================================================================

#[test]
fn test_match_exact_path() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();

    let m = router.match_route("GET", "/api/users", None, &Default::default(), &Default::default());
    assert!(m.is_some());
    assert_eq!(m.unwrap().route_id.as_ref(), "r1");
}

#[test]
fn test_no_match_wrong_path() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();

    let m = router.match_route("GET", "/api/posts", None, &Default::default(), &Default::default());
    assert!(m.is_none());
}

#[test]
fn test_match_method_specific() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();
    router.add_route(test_route("r2", "/api/posts", vec!["POST"])).unwrap();

    let m = router.match_route("GET", "/api/users", None, &Default::default(), &Default::default());
    assert!(m.is_some());
    assert_eq!(m.unwrap().route_id.as_ref(), "r1");

    let m = router.match_route("POST", "/api/posts", None, &Default::default(), &Default::default());
    assert!(m.is_some());
    assert_eq!(m.unwrap().route_id.as_ref(), "r2");
}

#[test]
fn test_no_match_wrong_method() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/users", vec!["GET"])).unwrap();

    let m = router.match_route("DELETE", "/api/users", None, &Default::default(), &Default::default());
    assert!(m.is_none());
}

#[test]
fn test_match_any_method() {
    let router = Router::new();
    // Empty methods means match any method
    router.add_route(test_route("r1", "/api/catch-all", vec![])).unwrap();

    for method in ["GET", "POST", "PUT", "DELETE"] {
        assert!(router
            .match_route(method, "/api/catch-all", None, &Default::default(), &Default::default())
            .is_some());
    }
}

// =============================================================================
// Host Constraint Tests
// =============================================================================

#[test]
fn test_match_exact_host() {
    let router = Router::new();
    router.add_route(test_route_with_host("r1", "/api", "example.com")).unwrap();

    let m = router.match_route("GET", "/api", Some("example.com"), &Default::default(), &Default::default());
    assert!(m.is_some());
}

#[test]
fn test_no_match_wrong_host() {
    let router = Router::new();
    router.add_route(test_route_with_host("r1", "/api", "example.com")).unwrap();

    let m = router.match_route("GET", "/api", Some("other.com"), &Default::default(), &Default::default());
    assert!(m.is_none());
}

#[test]
fn test_host_matching_is_case_insensitive() {
    let router = Router::new();
    router.add_route(test_route_with_host("r1", "/api", "Example.COM")).unwrap();

    let m = router.match_route("GET", "/api", Some("example.com"), &Default::default(), &Default::default());
    assert!(m.is_some());
}

#[test]
fn test_no_host_constraint_matches_any() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api", vec![])).unwrap();

    // No host constraint on route should match any host or no host
    assert!(router.match_route("GET", "/api", None, &Default::default(), &Default::default()).is_some());
    assert!(router
        .match_route("GET", "/api", Some("anything.com"), &Default::default(), &Default::default())
        .is_some());
}

#[test]
fn test_host_required_but_not_provided() {
    let router = Router::new();
    router.add_route(test_route_with_host("r1", "/api", "example.com")).unwrap();

    // Route requires a host, but request doesn't have one
    let m = router.match_route("GET", "/api", None, &Default::default(), &Default::default());
    assert!(m.is_none());
}

#[test]
fn test_multiple_hosts() {
    let router = Router::new();
    let mut route = test_route("r1", "/api", vec![]);
    route.rules.hosts = vec!["primary.com".to_string(), "secondary.com".to_string()];
    router.add_route(route).unwrap();

    assert!(router.match_route("GET", "/api", Some("primary.com"), &Default::default(), &Default::default()).is_some());
    assert!(router.match_route("GET", "/api", Some("secondary.com"), &Default::default(), &Default::default()).is_some());
    assert!(router.match_route("GET", "/api", Some("other.com"), &Default::default(), &Default::default()).is_none());
}

// =============================================================================
// Priority / Tiebreak Tests
// =============================================================================

#[test]
fn test_higher_priority_wins_on_overlap() {
    let router = Router::new();
    let mut generic = test_route("generic", "/api", vec![]);
    generic.priority = 0;
    let mut specific = test_route("specific", "/api/v1", vec![]);
    specific.priority = 10;
    router.add_route(generic).unwrap();
    router.add_route(specific).unwrap();

    let m = router
        .match_route("GET", "/api/v1/users", None, &Default::default(), &Default::default())
        .unwrap();
    assert_eq!(m.route_id.as_ref(), "specific");
}

#[test]
fn test_fifo_tiebreak_on_equal_priority() {
    let router = Router::new();
    router.add_route(test_route("first", "/api", vec![])).unwrap();
    router.add_route(test_route("second", "/api", vec![])).unwrap();

    let m = router
        .match_route("GET", "/api/thing", None, &Default::default(), &Default::default())
        .unwrap();
    assert_eq!(m.route_id.as_ref(), "first");
}

// =============================================================================
// Replace All Tests
// =============================================================================

#[test]
fn test_replace_all_routes() {
    let router = Router::new();
    router.add_route(test_route("r1", "/old1", vec![])).unwrap();
    router.add_route(test_route("r2", "/old2", vec![])).unwrap();
    assert_eq!(router.route_count(), 2);

    let new_routes = vec![
        test_route("r3", "/new1", vec![]),
        test_route("r4", "/new2", vec![]),
        test_route("r5", "/new3", vec![]),
    ];
    router.replace_all(new_routes).unwrap();

    assert_eq!(router.route_count(), 3);
    assert!(router.get_route("r1").is_none());
    assert!(router.get_route("r2").is_none());
    assert!(router.get_route("r3").is_some());
    assert!(router.get_route("r4").is_some());
    assert!(router.get_route("r5").is_some());

    // Matching should work with new routes
    assert!(router.match_route("GET", "/new1", None, &Default::default(), &Default::default()).is_some());
    assert!(router.match_route("GET", "/old1", None, &Default::default(), &Default::default()).is_none());
}

#[test]
fn test_replace_all_empty() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api", vec![])).unwrap();
    assert_eq!(router.route_count(), 1);

    router.replace_all(vec![]).unwrap();
    assert_eq!(router.route_count(), 0);
    assert!(router.match_route("GET", "/api", None, &Default::default(), &Default::default()).is_none());
}

// =============================================================================
// Route Update Tests
// =============================================================================

#[test]
fn test_update_existing_route() {
    let router = Router::new();
    router.add_route(test_route("r1", "/api/v1", vec!["GET"])).unwrap();

    // Update the route with a new path
    router.update_route(test_route("r1", "/api/v2", vec!["GET"])).unwrap();

    assert_eq!(router.route_count(), 1);
    let route = router.get_route("r1").unwrap();
    assert_eq!(route.rules.paths[0].value, "/api/v2");

    // Should match new path, not old
    assert!(router.match_route("GET", "/api/v2", None, &Default::default(), &Default::default()).is_some());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_router_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let router = Arc::new(Router::new());

    // Add routes from multiple threads
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                let path = format!("/api/thread{}", i);
                router
                    .add_route(test_route(&format!("r{}", i), &path, vec![]))
                    .unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Force a final rebuild to ensure the compiled router reflects
    // all concurrent insertions (each add_route triggers rebuild, but
    // the last one to store() may not see the very last insertion).
    router.rebuild().unwrap();

    assert_eq!(router.route_count(), 10);

    // All routes should be matchable
    for i in 0..10 {
        let path = format!("/api/thread{}", i);
        assert!(
            router
                .match_route("GET", &path, None, &Default::default(), &Default::default())
                .is_some(),
            "Route /api/thread{} should be matchable",
            i
        );
    }
}

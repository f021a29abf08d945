pub mod circuit_breaker;
pub mod cors;
pub mod ip_restriction;
pub mod rate_limiting;
pub mod security_headers;
pub mod serverless_callout;
pub mod traffic_mirror;

// `limit_count` is a stale async-trait-era duplicate of `rate_limiting`,
// incompatible with the sync-factory `Plugin`/`PluginInstance` split and
// unreferenced here; left on disk as a final-trim candidate (see DESIGN.md).

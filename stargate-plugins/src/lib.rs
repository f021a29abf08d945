pub mod auth;
pub mod contract;
pub mod observability;
pub mod traffic;
pub mod transform;

use stargate_plugin::registry::PluginRegistry;
use std::sync::Arc;

/// Register every built-in plugin stage. Registration order doesn't matter —
/// `PluginPipeline::new()` sorts by `priority()` within each phase — but this
/// lists them outer-to-inner to mirror the fixed 15-stage order documented in
/// DESIGN.md's priority-band table.
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(Arc::new(observability::tracing_stage::TracingPlugin));
    registry.register(Arc::new(observability::access_log_stage::AccessLogPlugin));
    registry.register(Arc::new(observability::metrics_stage::MetricsPlugin));
    registry.register(Arc::new(traffic::cors::CorsPlugin));
    registry.register(Arc::new(transform::header_transform::HeaderTransformPlugin));
    registry.register(Arc::new(transform::mock_response::MockResponsePlugin));
    registry.register(Arc::new(contract::grpc_web::GrpcWebPlugin));
    registry.register(Arc::new(traffic::ip_restriction::IpRestrictionPlugin));
    registry.register(Arc::new(traffic::rate_limiting::RateLimitingPlugin));
    registry.register(Arc::new(auth::key_auth::KeyAuthPlugin));
    registry.register(Arc::new(auth::jwt_auth::JwtAuthPlugin));
    registry.register(Arc::new(auth::basic_auth::BasicAuthPlugin));
    registry.register(Arc::new(contract::aggregator::AggregatorPlugin));
    registry.register(Arc::new(traffic::serverless_callout::ServerlessCalloutPlugin));
    registry.register(Arc::new(contract::wasm_plugin::WasmPluginPlugin));
    registry.register(Arc::new(traffic::circuit_breaker::CircuitBreakerPlugin));
    registry.register(Arc::new(traffic::traffic_mirror::TrafficMirrorPlugin));
    registry.register(Arc::new(traffic::security_headers::SecurityHeadersPlugin));
}

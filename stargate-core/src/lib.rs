pub mod balancer;
pub mod config;
pub mod consumer;
pub mod error;
pub mod health;
pub mod matcher;
pub mod plugin_config;
pub mod route;
pub mod router;
pub mod service;
pub mod ssl;
pub mod upstream;

pub use balancer::Balancer;
pub use config::StargateConfig;
pub use error::GatewayError;
pub use health::HealthTracker;
pub use route::Route;
pub use router::Router;
pub use service::Service;
pub use upstream::Upstream;

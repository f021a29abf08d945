use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration for the Stargate gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StargateConfig {
    /// Gateway node ID (auto-generated if not set)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Proxy listener configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Metrics/health scrape endpoint configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// etcd configuration
    #[serde(default)]
    pub etcd: EtcdConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Deployment mode
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Graceful shutdown deadline, in milliseconds, before in-flight
    /// connections are dropped.
    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// HTTP listener address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Number of worker threads (0 = auto, one per core)
    #[serde(default)]
    pub workers: usize,

    /// Detect and opaque-splice HTTP/2 (h2c) connections
    #[serde(default = "default_true")]
    pub http2: bool,

    /// Enable WebSocket upgrade handling
    #[serde(default = "default_true")]
    pub websocket: bool,

    /// Request body buffer size (bytes)
    #[serde(default = "default_body_buffer_size")]
    pub body_buffer_size: usize,

    /// Upstream connection timeout (milliseconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upstream read timeout (milliseconds)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Upstream write timeout (milliseconds)
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Per-worker upstream keepalive connection pool size
    #[serde(default = "default_keepalive_pool_size")]
    pub keepalive_pool_size: usize,
}

/// Non-proxy HTTP surface: Prometheus scrape + liveness probe. Runs on the
/// tokio runtime, off the monoio data plane workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metrics/health listener address
    #[serde(default = "default_metrics_addr")]
    pub addr: SocketAddr,

    /// Enable the metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// etcd endpoint addresses
    #[serde(default = "default_etcd_endpoints")]
    pub endpoints: Vec<String>,

    /// Key prefix for gateway data
    #[serde(default = "default_etcd_prefix")]
    pub prefix: String,

    /// Connection timeout (milliseconds)
    #[serde(default = "default_etcd_timeout")]
    pub timeout_ms: u64,

    /// Username for etcd auth
    #[serde(default)]
    pub username: Option<String>,

    /// Password for etcd auth
    #[serde(default)]
    pub password: Option<String>,

    /// TLS configuration for the etcd client connection
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_cert: PathBuf,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// Ambient observability configuration. Exporter wire formats (where metrics
/// and logs are shipped to) are intentionally not configurable here beyond
/// the local Prometheus scrape endpoint; access logging is always emitted as
/// structured `tracing` events and is not separately configurable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Deployment mode: "standard" (etcd-backed), "standalone" (file-based)
    #[serde(default = "default_mode")]
    pub mode: DeploymentMode,

    /// Standalone config file (used when mode = standalone)
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// etcd-backed ConfigSource, watched for changes
    Standard,
    /// File-based ConfigSource, polled for changes
    Standalone,
}

impl Default for DeploymentMode {
    fn default() -> Self {
        Self::Standard
    }
}

impl StargateConfig {
    /// Load configuration from YAML file + environment variables.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["stargate.yaml", "/etc/stargate/stargate.yaml", "config/stargate.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        // Environment variables override: STARGATE_PROXY__HTTP_ADDR, etc.
        figment = figment.merge(Env::prefixed("STARGATE_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }

    /// Check if running in standalone mode (no etcd required)
    pub fn is_standalone(&self) -> bool {
        matches!(self.deployment.mode, DeploymentMode::Standalone)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            workers: 0,
            http2: true,
            websocket: true,
            body_buffer_size: default_body_buffer_size(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            keepalive_pool_size: default_keepalive_pool_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: default_etcd_endpoints(),
            prefix: default_etcd_prefix(),
            timeout_ms: default_etcd_timeout(),
            username: None,
            password: None,
            tls: None,
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Standard,
            config_file: None,
        }
    }
}

impl Default for StargateConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
            etcd: EtcdConfig::default(),
            observability: ObservabilityConfig::default(),
            deployment: DeploymentConfig::default(),
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
        }
    }
}

// Serde default functions
fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_http_addr() -> SocketAddr {
    "0.0.0.0:9080".parse().unwrap()
}

fn default_metrics_addr() -> SocketAddr {
    "127.0.0.1:9180".parse().unwrap()
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_etcd_prefix() -> String {
    "/stargate".to_string()
}

fn default_etcd_timeout() -> u64 {
    5000
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_body_buffer_size() -> usize {
    64 * 1024
}

fn default_connect_timeout() -> u64 {
    6000
}

fn default_read_timeout() -> u64 {
    15000
}

fn default_write_timeout() -> u64 {
    15000
}

fn default_keepalive_pool_size() -> usize {
    64
}

fn default_shutdown_deadline_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_mode() -> DeploymentMode {
    DeploymentMode::Standard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = StargateConfig::default();
        assert_eq!(cfg.proxy.http_addr.port(), 9080);
        assert_eq!(cfg.metrics.addr.port(), 9180);
        assert_eq!(cfg.shutdown_deadline_ms, 30_000);
        assert!(!cfg.is_standalone());
    }

    #[test]
    fn test_standalone_mode_detection() {
        let mut cfg = StargateConfig::default();
        cfg.deployment.mode = DeploymentMode::Standalone;
        assert!(cfg.is_standalone());
    }
}

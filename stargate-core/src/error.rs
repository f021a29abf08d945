use thiserror::Error;

/// Unified error type for the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Upstream not found: {0}")]
    UpstreamNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("No healthy targets for upstream: {0}")]
    NoHealthyTargets(String),

    #[error("Plugin error: {0}")]
    PluginError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Config decode error: {0}")]
    ConfigDecode(String),

    #[error("Auth failed: {0}")]
    AuthFailed(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("IP denied: {0}")]
    IpDenied(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Fatal startup error: {0}")]
    FatalStartup(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map to an HTTP status code. Errors with no natural client-facing status
    /// (decode failures surfaced only in logs, fatal startup errors that abort
    /// the process before a listener exists) still return a status so callers
    /// that must write *some* response have one, but those paths are not
    /// reached during normal operation.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::RouteNotFound(_) => 404,
            GatewayError::UpstreamNotFound(_) => 502,
            GatewayError::NoHealthyTargets(_) => 503,
            GatewayError::ServiceNotFound(_) => 503,
            GatewayError::ConsumerNotFound(_) => 401,
            GatewayError::AuthFailed(_) => 401,
            GatewayError::RateLimited => 429,
            GatewayError::IpDenied(_) => 403,
            GatewayError::UpstreamTimeout(_) => 504,
            GatewayError::Transport(_) => 502,
            GatewayError::PluginError(_) => 500,
            _ => 500,
        }
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> Vec<u8> {
        let status = self.status_code();
        let msg = self.to_string();
        format!(r#"{{"error":"{}","status":{}}}"#, msg, status).into_bytes()
    }
}

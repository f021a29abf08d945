pub mod access_log_stage;
pub mod metrics_stage;
pub mod tracing_stage;

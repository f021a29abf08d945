use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use std::sync::OnceLock;

/// Records the `http_requests_total` / `http_request_duration` pair,
/// registered once into the process-wide default registry
/// (`prometheus::gather()`) so the scrape endpoint doesn't need a handle
/// threaded in from this crate.
pub struct MetricsPlugin;

struct Metrics {
    http_requests_total: IntCounterVec,
    http_request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let http_requests_total = IntCounterVec::new(
            Opts::new("stargate_http_requests_total", "Total HTTP requests").namespace("stargate"),
            &["route", "method", "status"],
        )
        .expect("valid counter opts");
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("stargate_http_request_duration_seconds", "Request latency")
                .namespace("stargate")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["route"],
        )
        .expect("valid histogram opts");

        // Registering twice (e.g. repeated `configure()` in tests) would
        // panic on the default registry; ignore the AlreadyReg error.
        let _ = prometheus::register(Box::new(http_requests_total.clone()));
        let _ = prometheus::register(Box::new(http_request_duration.clone()));

        Metrics { http_requests_total, http_request_duration }
    })
}

struct MetricsInstance;

impl Plugin for MetricsPlugin {
    fn name(&self) -> &str {
        "metrics"
    }

    fn priority(&self) -> i32 {
        3200
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Log]
    }

    fn configure(&self, _config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        metrics();
        Ok(Box::new(MetricsInstance))
    }
}

impl PluginInstance for MetricsInstance {
    fn name(&self) -> &str {
        "metrics"
    }

    fn priority(&self) -> i32 {
        3200
    }

    fn log(&self, ctx: &mut PluginContext) -> PluginResult {
        let m = metrics();
        let status = ctx.response_status.unwrap_or(0).to_string();
        m.http_requests_total
            .with_label_values(&[&ctx.route_id, &ctx.request_method, &status])
            .inc();
        m.http_request_duration
            .with_label_values(&[&ctx.route_id])
            .observe(ctx.elapsed_ms() / 1000.0);
        PluginResult::Continue
    }
}

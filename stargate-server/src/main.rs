// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Stargate — Zero-Overhead API Gateway
//
//  Architecture: monoio thread-per-core + shared-nothing data plane
//  Metrics:      Prometheus scrape endpoint on a dedicated tokio thread
//  Config:       standalone YAML / etcd with watch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use stargate_core::balancer::Balancer;
use stargate_core::config::StargateConfig;
use stargate_core::router::Router;
use stargate_plugin::registry::PluginRegistry;
use stargate_proxy::worker::{self, SharedState};
use stargate_store::cache::ConfigCache;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Global shutdown flag — checked by signal handler.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "stargate", version, about = "Stargate — Zero-Overhead API Gateway")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/stargate/stargate.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Stargate starting — monoio thread-per-core engine"
    );

    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        StargateConfig::load(cli.config.to_str())?
    } else {
        info!("No config file found, using defaults");
        StargateConfig::default()
    };

    let num_workers = effective_workers(config.proxy.workers);
    info!(workers = num_workers, "Worker count");

    // ── Plugin registry ──
    let mut registry = PluginRegistry::new();
    stargate_plugins::register_all(&mut registry);
    info!(plugins = registry.len(), "Plugins registered");

    // ── Config cache ──
    let cache = ConfigCache::new();

    // ── Initial router, built from whatever the cache already holds ──
    let router = Router::new();
    for entry in cache.routes.iter() {
        router.add_route(entry.value().clone())?;
    }

    // ── Initial balancer, seeded from whatever the cache already holds ──
    let balancer = Balancer::new();
    for entry in cache.upstreams.iter() {
        balancer.update_upstream(entry.value().clone());
    }

    // ── Shared state ──
    let shared = SharedState::new(router, balancer, registry, cache.clone(), config.clone());

    // ── Spawn monoio worker threads ──
    let worker_handles = worker::spawn_workers(Arc::clone(&shared), num_workers);

    info!(
        workers = num_workers,
        proxy_addr = %config.proxy.http_addr,
        "Stargate is ready — serving traffic"
    );

    // ── Graceful shutdown: wait for SIGTERM/SIGINT ──
    setup_signal_handler();

    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("Shutdown signal received, stopping...");

    // In the current architecture, workers run in an infinite accept loop.
    // On process exit, all threads are cleaned up by the OS.
    drop(worker_handles);

    info!("Stargate stopped");
    Ok(())
}

/// Resolve the configured worker count, deriving one worker per core when
/// `workers` is left at its `0` (auto) default.
fn effective_workers(workers: usize) -> usize {
    if workers > 0 {
        workers
    } else {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

fn setup_signal_handler() {
    // SIGTERM (docker stop) + SIGINT (Ctrl+C)
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, signal_handler as libc::sighandler_t);
        }
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

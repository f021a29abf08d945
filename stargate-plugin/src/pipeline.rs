use crate::plugin::{Phase, PluginContext, PluginInstance, PluginResult};
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// The plugin execution pipeline: one [`Box<dyn PluginInstance>`] per
/// (route, plugin) pair, bucketed by phase and sorted by priority
/// descending. Built-in stages register with fixed priority bands (see
/// `stargate-plugins::priority`) so this assembler reproduces the gateway's
/// declared fixed stage order without the order being configurable
/// per-request — the same plugin instance is shared (via `Arc`-free
/// ownership split at build time) across whichever phases it participates
/// in.
pub struct PluginPipeline {
    phases: HashMap<Phase, Vec<Box<dyn PluginInstance>>>,
}

impl PluginPipeline {
    /// Build a pipeline from instances already bucketed per phase by the
    /// caller (since a `Box<dyn PluginInstance>` can't cheaply be shared
    /// across multiple phase buckets, the caller constructs one instance per
    /// phase it should run in via repeated `plugin.configure(&config)`
    /// calls).
    pub fn new(mut phases: HashMap<Phase, Vec<Box<dyn PluginInstance>>>) -> Self {
        for bucket in phases.values_mut() {
            bucket.sort_by(|a, b| b.priority().cmp(&a.priority()));
        }
        Self { phases }
    }

    pub fn execute_phase(&self, phase: Phase, ctx: &mut PluginContext) -> PluginResult {
        let Some(plugins) = self.phases.get(&phase) else {
            return PluginResult::Continue;
        };

        for instance in plugins {
            debug!(plugin = %instance.name(), phase = %phase, "executing plugin");

            let result = match phase {
                Phase::Rewrite => instance.rewrite(ctx),
                Phase::Access => instance.access(ctx),
                Phase::BeforeProxy => instance.before_proxy(ctx),
                Phase::HeaderFilter => instance.header_filter(ctx),
                Phase::BodyFilter => instance.body_filter(ctx),
                Phase::Log => instance.log(ctx),
            };

            match result {
                PluginResult::Continue => {}
                PluginResult::Response { status, headers, body } => {
                    debug!(plugin = %instance.name(), phase = %phase, status, "plugin short-circuited with response");
                    return PluginResult::Response { status, headers, body };
                }
                PluginResult::Error(msg) => {
                    error!(plugin = %instance.name(), phase = %phase, error = %msg, "plugin execution error");
                    return PluginResult::Error(msg);
                }
            }
        }

        PluginResult::Continue
    }

    /// Rewrite -> Access -> BeforeProxy.
    pub fn execute_request_phases(&self, ctx: &mut PluginContext) -> PluginResult {
        for phase in [Phase::Rewrite, Phase::Access, Phase::BeforeProxy] {
            match self.execute_phase(phase, ctx) {
                PluginResult::Continue => {}
                other => return other,
            }
        }
        PluginResult::Continue
    }

    /// HeaderFilter -> BodyFilter.
    pub fn execute_response_phases(&self, ctx: &mut PluginContext) -> PluginResult {
        for phase in [Phase::HeaderFilter, Phase::BodyFilter] {
            match self.execute_phase(phase, ctx) {
                PluginResult::Continue => {}
                other => return other,
            }
        }
        PluginResult::Continue
    }

    /// Always runs every Log-phase plugin; errors are logged, never
    /// propagated — observability must not be able to fail a request.
    pub fn execute_log_phase(&self, ctx: &mut PluginContext) {
        if let Some(plugins) = self.phases.get(&Phase::Log) {
            for instance in plugins {
                if let PluginResult::Error(msg) = instance.log(ctx) {
                    warn!(plugin = %instance.name(), error = %msg, "log phase plugin error (non-fatal)");
                }
            }
        }
    }

    pub fn plugin_count(&self) -> usize {
        self.phases.values().map(|v| v.len()).sum()
    }
}

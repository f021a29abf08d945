use stargate_plugin::plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
use serde::Deserialize;

/// WASM plugin stage (spec.md item 13): sandboxed request/response transform
/// via an ABI. No WASM runtime is bundled — spec.md §1 scopes "specific
/// plugin implementations (WASM runtime...)" out, specifying only the
/// interface. This exposes the ABI-shaped config (module reference + the
/// phases it hooks) and is a log-only pass-through, occupying the pipeline
/// slot so routes that declare a WASM module don't silently skip a stage.
pub struct WasmPluginPlugin;

#[derive(Debug, Clone, Deserialize, Default)]
struct WasmPluginConfig {
    /// Reference to the module (path, OCI ref, or registry id) — opaque to
    /// this crate, resolved by whatever runtime embeds it.
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    entrypoint: Option<String>,
}

struct WasmPluginInstance {
    module: Option<String>,
}

impl Plugin for WasmPluginPlugin {
    fn name(&self) -> &str {
        "wasm-plugin"
    }

    fn priority(&self) -> i32 {
        2200
    }

    fn phases(&self) -> &[Phase] {
        &[Phase::Rewrite, Phase::HeaderFilter, Phase::BodyFilter]
    }

    fn configure(&self, config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let cfg: WasmPluginConfig = if config.is_null() {
            WasmPluginConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("wasm-plugin config error: {e}"))?
        };
        Ok(Box::new(WasmPluginInstance { module: cfg.module }))
    }
}

impl PluginInstance for WasmPluginInstance {
    fn name(&self) -> &str {
        "wasm-plugin"
    }

    fn priority(&self) -> i32 {
        2200
    }

    fn rewrite(&self, ctx: &mut PluginContext) -> PluginResult {
        if let Some(module) = &self.module {
            tracing::debug!(module = %module, "wasm module registered, no runtime bundled; pass-through");
            ctx.set_var("wasm_module".to_string(), serde_json::Value::String(module.clone()));
        }
        PluginResult::Continue
    }
}

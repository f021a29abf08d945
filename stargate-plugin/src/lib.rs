pub mod pipeline;
pub mod plugin;
pub mod registry;

pub use pipeline::PluginPipeline;
pub use plugin::{Phase, Plugin, PluginContext, PluginInstance, PluginResult};
pub use registry::PluginRegistry;

pub mod aggregator;
pub mod grpc_web;
pub mod wasm_plugin;

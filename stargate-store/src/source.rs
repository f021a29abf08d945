use async_trait::async_trait;
use std::collections::HashMap;

/// Whether a watch event is an upsert or a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// One change observed under a watched prefix.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: String,
    pub value: Vec<u8>,
    pub kind: EventKind,
}

/// A callback invoked once per observed change. Boxed so both the etcd and
/// file sources can store a heterogeneous set of watchers.
pub type WatchCallback = Box<dyn Fn(WatchEvent) + Send + Sync>;

/// Pluggable configuration backend. The reconciler depends only on these
/// four operations, so etcd, a local directory, or an in-memory fixture are
/// all equally valid implementations.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// List every key currently stored under `prefix`.
    async fn list(&self, prefix: &str) -> anyhow::Result<HashMap<String, Vec<u8>>>;

    /// Register a callback that fires on every future put/delete under
    /// `prefix`. Does not replay existing keys — callers combine this with
    /// an initial `list()` to get a consistent starting point.
    async fn watch(&self, prefix: &str, callback: WatchCallback) -> anyhow::Result<()>;

    /// Stop watching `prefix`. A no-op if nothing was watching it.
    async fn unwatch(&self, prefix: &str) -> anyhow::Result<()>;

    /// Release any held connections/handles. Safe to call more than once.
    async fn close(&self) -> anyhow::Result<()>;
}

use crate::schema::Schema;
use crate::source::{ConfigSource, EventKind, WatchCallback, WatchEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// etcd-backed [`ConfigSource`]. One long-lived client, shared across every
/// watched prefix; each `watch()` call spawns its own tokio task that owns
/// the resulting stream and forwards decoded events to the caller's
/// callback until `unwatch()` cancels it.
pub struct EtcdConfigSource {
    client: etcd_client::Client,
    schema: Schema,
    watch_ids: Arc<Mutex<HashMap<String, i64>>>,
}

impl EtcdConfigSource {
    pub async fn connect(endpoints: &[String], key_prefix: &str) -> anyhow::Result<Self> {
        let client = etcd_client::Client::connect(endpoints, None).await?;
        info!(?endpoints, "connected to etcd");
        Ok(Self {
            client,
            schema: Schema::new(key_prefix),
            watch_ids: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn full_prefix(&self, prefix: &str) -> String {
        format!("{}/{}", self.schema_root(), prefix.trim_matches('/'))
    }

    fn schema_root(&self) -> String {
        // Schema only exposes per-entity prefix builders; the root is
        // recovered here rather than re-parsing it out of them.
        self.schema
            .routes_prefix()
            .trim_end_matches("routes/")
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
impl ConfigSource for EtcdConfigSource {
    async fn list(&self, prefix: &str) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let root = self.schema_root();
        let full = self.full_prefix(prefix);
        let mut client = self.client.clone();
        let resp = client
            .get(full.as_bytes(), Some(etcd_client::GetOptions::new().with_prefix()))
            .await?;
        let mut out = HashMap::new();
        for kv in resp.kvs() {
            let raw = String::from_utf8_lossy(kv.key()).into_owned();
            let key = raw.strip_prefix(&root).map(|s| s.trim_start_matches('/').to_string()).unwrap_or(raw);
            out.insert(key, kv.value().to_vec());
        }
        Ok(out)
    }

    async fn watch(&self, prefix: &str, callback: WatchCallback) -> anyhow::Result<()> {
        let root = self.schema_root();
        let full = self.full_prefix(prefix);
        let mut client = self.client.clone();
        let (watcher, mut stream) = client
            .watch(full.as_bytes(), Some(etcd_client::WatchOptions::new().with_prefix()))
            .await?;

        self.watch_ids.lock().await.insert(prefix.to_string(), watcher.watch_id());

        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let raw = String::from_utf8_lossy(kv.key()).into_owned();
                            let key = raw
                                .strip_prefix(&root)
                                .map(|s| s.trim_start_matches('/').to_string())
                                .unwrap_or(raw);
                            let kind = match event.event_type() {
                                etcd_client::EventType::Put => EventKind::Put,
                                etcd_client::EventType::Delete => EventKind::Delete,
                            };
                            debug!(key = %key, ?kind, "etcd watch event");
                            callback(WatchEvent { key, value: kv.value().to_vec(), kind });
                        }
                    }
                    Ok(None) => {
                        info!(prefix = %full, "etcd watch stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(prefix = %full, error = %e, "etcd watch stream error");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn unwatch(&self, prefix: &str) -> anyhow::Result<()> {
        if let Some(id) = self.watch_ids.lock().await.remove(prefix) {
            let mut client = self.client.clone();
            client.watch_client().cancel(id).await?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let ids: Vec<i64> = self.watch_ids.lock().await.drain().map(|(_, v)| v).collect();
        let mut client = self.client.clone();
        for id in ids {
            let _ = client.watch_client().cancel(id).await;
        }
        Ok(())
    }
}

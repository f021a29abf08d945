use crate::source::{ConfigSource, EventKind, WatchCallback, WatchEvent};
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Directory-backed [`ConfigSource`] for file-only deployments. Each entity
/// is one `<base_dir>/<prefix>/<id>.json` file; the returned key mirrors the
/// etcd shape (`<prefix>/<id>`) so the reconciler's dispatch logic doesn't
/// need to know which backend it's talking to.
pub struct FileConfigSource {
    base_dir: PathBuf,
    watchers: Mutex<HashMap<String, RecommendedWatcher>>,
}

impl FileConfigSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), watchers: Mutex::new(HashMap::new()) }
    }

    fn prefix_dir(&self, prefix: &str) -> PathBuf {
        self.base_dir.join(prefix.trim_matches('/'))
    }

    fn key_for(prefix: &str, path: &Path) -> Option<String> {
        let id = path.file_stem()?.to_str()?;
        Some(format!("{}/{}", prefix.trim_matches('/'), id))
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn list(&self, prefix: &str) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let dir = self.prefix_dir(prefix);
        let mut out = HashMap::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = Self::key_for(prefix, &path) else { continue };
            out.insert(key, std::fs::read(&path)?);
        }
        Ok(out)
    }

    async fn watch(&self, prefix: &str, callback: WatchCallback) -> anyhow::Result<()> {
        let dir = self.prefix_dir(prefix);
        std::fs::create_dir_all(&dir)?;
        let prefix_owned = prefix.to_string();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "file config watch error");
                    return;
                }
            };
            for path in &event.paths {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(key) = Self::key_for(&prefix_owned, path) else { continue };
                match event.kind {
                    notify::EventKind::Remove(_) => {
                        debug!(key = %key, "file config delete");
                        callback(WatchEvent { key, value: Vec::new(), kind: EventKind::Delete });
                    }
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_) => {
                        match std::fs::read(path) {
                            Ok(value) => {
                                debug!(key = %key, "file config put");
                                callback(WatchEvent { key, value, kind: EventKind::Put });
                            }
                            Err(e) => warn!(key = %key, error = %e, "failed to read changed config file"),
                        }
                    }
                    _ => {}
                }
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        self.watchers.lock().unwrap().insert(prefix.to_string(), watcher);
        Ok(())
    }

    async fn unwatch(&self, prefix: &str) -> anyhow::Result<()> {
        self.watchers.lock().unwrap().remove(prefix);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.watchers.lock().unwrap().clear();
        Ok(())
    }
}

//! Config providers backing the proxy manager.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::{ConfigResult, ProxyConfig};
use crate::mcp::{Backends, ConfigProvider};

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/// Fixed backend set.
pub struct StaticProvider {
    backends: Backends,
}

impl StaticProvider {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.backends())
    }
}

impl ConfigProvider for StaticProvider {
    fn current_backends(&self) -> Backends {
        Arc::clone(&self.backends)
    }
}

/// Backend set that follows a config file on disk.
///
/// The file's directory is watched so editors that replace the file on save
/// are picked up too. A reload that fails to read or parse keeps the previous
/// backend set.
pub struct FileWatchProvider {
    path: PathBuf,
    current: Arc<RwLock<Backends>>,
    generation: watch::Receiver<u64>,
    _watcher: RecommendedWatcher,
    reload_task: JoinHandle<()>,
}

impl FileWatchProvider {
    /// Load `path` and start watching it. The initial load must succeed.
    pub fn start(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let config = ProxyConfig::load(&path)?;
        info!(
            path = %path.display(),
            servers = config.servers.len(),
            "Loaded backend configuration"
        );
        let current = Arc::new(RwLock::new(config.backends()));

        let (event_tx, event_rx) = mpsc::channel::<()>(16);
        let file_name = path.file_name().map(|name| name.to_os_string());
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = event_tx.try_send(());
                    }
                }
                Err(err) => {
                    error!(%err, "Config watcher error");
                }
            },
            notify::Config::default(),
        )?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let (generation_tx, generation) = watch::channel(0u64);
        let reload_task = tokio::spawn(reload_loop(
            path.clone(),
            Arc::clone(&current),
            event_rx,
            generation_tx,
        ));

        Ok(Self {
            path,
            current,
            generation,
            _watcher: watcher,
            reload_task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counter bumped after every successful reload.
    pub fn reloads(&self) -> watch::Receiver<u64> {
        self.generation.clone()
    }
}

impl ConfigProvider for FileWatchProvider {
    fn current_backends(&self) -> Backends {
        Arc::clone(&self.current.read())
    }
}

impl Drop for FileWatchProvider {
    fn drop(&mut self) {
        self.reload_task.abort();
    }
}

async fn reload_loop(
    path: PathBuf,
    current: Arc<RwLock<Backends>>,
    mut events: mpsc::Receiver<()>,
    generation: watch::Sender<u64>,
) {
    while events.recv().await.is_some() {
        // Collapse the burst an editor save produces into one reload.
        tokio::time::sleep(RELOAD_DEBOUNCE).await;
        while events.try_recv().is_ok() {}

        let load_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || ProxyConfig::load(&load_path)).await;
        match loaded {
            Ok(Ok(config)) => {
                info!(
                    path = %path.display(),
                    servers = config.servers.len(),
                    "Reloaded backend configuration"
                );
                *current.write() = config.backends();
                generation.send_modify(|g| *g += 1);
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), "Config reload failed, keeping previous backends: {}", e);
            }
            Err(e) => {
                warn!("Config reload task failed: {}", e);
            }
        }
    }
    debug!("Config watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs};

    use super::*;
    use crate::config::ConfigError;

    fn names(backends: &Backends) -> Vec<String> {
        backends.keys().cloned().collect()
    }

    #[test]
    fn test_static_provider_returns_same_snapshot() {
        let provider = StaticProvider::new(Arc::new(BTreeMap::new()));
        let a = provider.current_backends();
        let b = provider.current_backends();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_initial_load_must_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        fs::write(&path, "{ not json").unwrap();

        let err = FileWatchProvider::start(&path).err().unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_reload_on_change_and_keep_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        fs::write(
            &path,
            r#"{"servers": {"a": {"type": "stdio", "command": "mcp-a"}}}"#,
        )
        .unwrap();

        let provider = FileWatchProvider::start(&path).unwrap();
        assert_eq!(names(&provider.current_backends()), vec!["a"]);
        let mut reloads = provider.reloads();

        fs::write(
            &path,
            r#"{"servers": {
                "a": {"type": "stdio", "command": "mcp-a"},
                "b": {"type": "http", "url": "http://localhost:9000/mcp"}
            }}"#,
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), reloads.wait_for(|g| *g >= 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(names(&provider.current_backends()), vec!["a", "b"]);
        tokio::time::sleep(RELOAD_DEBOUNCE * 3).await;
        let good_generation = *provider.reloads().borrow();

        // a broken file leaves the last good snapshot in place
        fs::write(&path, "{ broken").unwrap();
        tokio::time::sleep(RELOAD_DEBOUNCE * 3).await;
        assert_eq!(names(&provider.current_backends()), vec!["a", "b"]);
        assert_eq!(*provider.reloads().borrow(), good_generation);
    }
}

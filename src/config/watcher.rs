use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ConfigStore;
use crate::error::ServerError;

/// Reloads triggered less than this long after the last successful reload
/// are dropped.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

/// Wait after a change event before reading, so the writer can finish
/// flushing the file.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct WatcherState {
    running: bool,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

/// Watches the directory containing the config file and reloads the store
/// on write/create events touching it.
///
/// Directory scope matters: deleting and re-creating the file would be
/// invisible to a watch on the file itself. Watcher failures log and
/// continue; a failure to start disables hot reload without killing the
/// server.
pub struct ConfigWatcher {
    store: Arc<ConfigStore>,
    state: Mutex<WatcherState>,
}

impl ConfigWatcher {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            state: Mutex::new(WatcherState {
                running: false,
                watcher: None,
                task: None,
            }),
        }
    }

    /// Start watching. Idempotent: a second call on a running watcher is a
    /// no-op.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().expect("watcher state poisoned");
        if state.running {
            return Ok(());
        }

        let config_path = self.store.path().to_path_buf();
        let watch_dir: PathBuf = match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name: OsString = config_path
            .file_name()
            .ok_or_else(|| {
                ServerError::Internal(format!(
                    "config path has no file name: {}",
                    config_path.display()
                ))
            })?
            .to_os_string();

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>(EVENT_CHANNEL_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                // Runs on the notify thread; blocking send is fine there
                let _ = tx.blocking_send(result);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| ServerError::Internal(format!("failed to create file watcher: {}", e)))?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ServerError::Internal(format!(
                    "failed to watch {}: {}",
                    watch_dir.display(),
                    e
                ))
            })?;

        let store = self.store.clone();
        let task = tokio::spawn(watch_loop(store, rx, file_name));

        state.watcher = Some(watcher);
        state.task = Some(task);
        state.running = true;
        tracing::info!(path = %config_path.display(), "started configuration file watcher");
        Ok(())
    }

    /// Stop watching and drop the filesystem subscription
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("watcher state poisoned");
        if !state.running {
            return;
        }

        state.watcher = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.running = false;
        tracing::info!("stopped configuration file watcher");
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("watcher state poisoned").running
    }
}

async fn watch_loop(
    store: Arc<ConfigStore>,
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    file_name: OsString,
) {
    let mut last_reload: Option<Instant> = None;

    while let Some(result) = rx.recv().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "file watcher error");
                continue;
            }
        };

        let touches_config = event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()));
        if !touches_config {
            continue;
        }

        match event.kind {
            EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) => {
                if let Some(at) = last_reload {
                    if at.elapsed() < DEBOUNCE_INTERVAL {
                        continue;
                    }
                }

                // Let the writer finish before reading
                tokio::time::sleep(SETTLE_DELAY).await;

                match store.load().await {
                    Ok(()) => {
                        tracing::info!("configuration reloaded");
                        last_reload = Some(Instant::now());
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to reload configuration"),
                }
            }
            EventKind::Remove(_) => {
                tracing::info!("configuration file removed; waiting for re-creation");
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                tracing::info!("configuration file renamed");
            }
            _ => {}
        }
    }
}

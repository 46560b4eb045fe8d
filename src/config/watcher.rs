//! Hot reload of the pool configuration file.
//!
//! Editors often emit several events per save; a reload that parses to the
//! configuration already delivered is not forwarded again.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::PoolConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watches one configuration file and forwards every new valid version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<PoolConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for reloaded configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<PoolConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        // Seed with the current file so the first no-op save is swallowed.
        let last = Mutex::new(load_config(&path).ok());
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                reload(&reload_path, &last, &update_tx);
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// Load `path` and forward it unless it matches the last delivered config.
/// Invalid files are logged and the current configuration stays in force.
fn reload(
    path: &Path,
    last: &Mutex<Option<PoolConfig>>,
    update_tx: &mpsc::UnboundedSender<PoolConfig>,
) {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Config reload failed, keeping current configuration");
            return;
        }
    };

    let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
    if last.as_ref() == Some(&config) {
        tracing::debug!(path = ?path, "Config unchanged, skipping reload");
        return;
    }
    tracing::info!(
        path = ?path,
        max_size = config.channel_pool.max_size,
        methods = config.methods.len(),
        "Config reloaded"
    );
    *last = Some(config.clone());
    let _ = update_tx.send(config);
}

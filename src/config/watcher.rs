//! Source file watcher for hot reload.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Monitors configuration source files and reports which one changed.
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    poll_interval: Duration,
    change_tx: mpsc::UnboundedSender<PathBuf>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver of changed paths.
    pub fn new(paths: Vec<PathBuf>, poll_interval: Duration) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        (
            Self {
                paths,
                poll_interval,
                change_tx,
            },
            change_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// Each file's parent directory is watched, so files that do not exist
    /// yet (an optional `.env`) are picked up when created.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.change_tx.clone();
        let paths = self.paths.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                        return;
                    }
                    for changed in event.paths.iter().filter(|p| is_watched(&paths, p)) {
                        tracing::info!(path = %changed.display(), "Config source change detected");
                        let _ = tx.send(changed.clone());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        let mut dirs: Vec<PathBuf> = self.paths.iter().map(|p| watch_dir(p)).collect();
        dirs.sort();
        dirs.dedup();
        for dir in &dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(files = self.paths.len(), dirs = dirs.len(), "Config watcher started");
        Ok(watcher)
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_watched(paths: &[PathBuf], changed: &Path) -> bool {
    paths
        .iter()
        .any(|p| changed == p || (p.file_name().is_some() && changed.ends_with(p)))
}

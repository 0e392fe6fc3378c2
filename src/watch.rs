//! Configuration file watcher for hot reload.

use std::path::PathBuf;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Watches configuration files and reports which one changed.
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    change_tx: mpsc::UnboundedSender<PathBuf>,
}

impl ConfigWatcher {
    /// Create a new watcher over `paths`.
    ///
    /// Returns the watcher and a receiver yielding the path of every file
    /// that was modified or re-created.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        (Self { paths: paths.into_iter().collect(), change_tx }, change_rx)
    }

    /// Start watching in the background.
    ///
    /// Paths that cannot be watched, e.g. because they do not exist, are
    /// logged and skipped. Watching stops when the returned watcher is dropped.
    ///
    /// # Errors
    ///
    /// Returns `notify::Error` if the platform watcher cannot be created.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.change_tx;
        let fallback = self.paths.first().cloned().unwrap_or_default();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let path = event.paths.first().cloned().unwrap_or_else(|| fallback.clone());
                    debug!(path = %path.display(), kind = ?event.kind, "config file change detected");
                    let _ = tx.send(path);
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for path in &self.paths {
            match watcher.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => info!(path = %path.display(), "watching config file"),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot watch config file, skipping it"),
            }
        }

        Ok(watcher)
    }
}

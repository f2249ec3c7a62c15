//! Config file watcher.
//!
//! Watches the file's **directory** rather than the file itself: editors
//! commonly save by writing a temp file and renaming it over the original,
//! which a file watch loses track of.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Quiet period after the last event before the file is re-read.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Emits a unit signal whenever the watched file may have changed.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> notify::Result<Self> {
        // One pending signal is enough: the reader always re-reads the whole file.
        let (tx, rx) = mpsc::channel(1);
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(ev) => {
                let ours = ev
                    .paths
                    .iter()
                    .any(|p| file_name.is_none() || p.file_name() == file_name.as_deref());
                if ours {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => warn!("config watch error: {e}"),
        })?;

        let parent = watch_dir(path);
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        debug!("watching {} for config changes", parent.display());

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next change, then let a burst of events settle.
    ///
    /// Returns `None` if the watcher has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await?;
        loop {
            match tokio::time::timeout(DEBOUNCE, self.rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return None,
                Err(_) => return Some(()),
            }
        }
    }
}

fn watch_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

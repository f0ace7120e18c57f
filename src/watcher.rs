//! File watcher driving re-evaluation of a document.
//!
//! [`DocumentWatcher`] uses the `notify` crate to watch the directory that
//! holds a document, so editors that save through write-to-temp-and-rename
//! are detected too. Events for other files in that directory are ignored.
//! Bursts of events are coalesced into a single change notification.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Quiet period used to coalesce bursts of file-system events.
pub const DEBOUNCE: Duration = Duration::from_millis(150);

/// Returns `true` for events that indicate the file was written or
/// replaced.
fn is_document_change(event: &Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

/// Watches one document file for changes.
///
/// Dropping the watcher stops the underlying OS watch.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    changes: mpsc::UnboundedReceiver<()>,
}

impl DocumentWatcher {
    /// Start watching `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if the path has no file name or the OS
    /// watch cannot be established.
    pub fn new(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| AppError::Watch(format!("'{}' is not a file path", path.display())))?;

        let (tx, changes) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_document_change(&event, &file_name) => {
                    debug!(kind = ?event.kind, "document changed on disk");
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "document watcher error"),
            },
        )
        .map_err(|err| AppError::Watch(format!("failed to create file watcher: {err}")))?;

        let watch_target = path
            .parent()
            .filter(|parent| parent != &Path::new(""))
            .unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Watch(format!(
                    "failed to watch '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %path.display(), "watching document for changes");
        Ok(Self {
            _watcher: watcher,
            changes,
        })
    }

    /// Wait for the next change, swallowing further events that arrive
    /// within [`DEBOUNCE`]. Returns `None` if the watcher has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await?;
        loop {
            match tokio::time::timeout(DEBOUNCE, self.changes.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) | Err(_) => return Some(()),
            }
        }
    }
}

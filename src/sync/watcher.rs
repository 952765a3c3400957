// ============================================================================
// File Watcher Adapter
// ============================================================================
//
// Bridges notify's platform watchers onto the coalescer. No ordering is
// assumed beyond eventual delivery; the coalescer computes the net effect.
// Enabled by the default-on `watch` feature.
//
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use log::{trace, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;

use crate::core::{FileId, Result, StoreError};
use crate::sync::coalescer::{ChangeCoalescer, FileEvent};

/// Watches a configuration root and feeds net changes to the coalescer
///
/// The owning task awaits [`FileWatcher::changed`] and calls the
/// orchestrator's `reconcile` when it fires; events arriving mid-cycle
/// simply queue for the next one.
pub struct FileWatcher {
    // kept alive; dropping it stops the platform watcher
    _watcher: RecommendedWatcher,
    wakeup: Arc<Notify>,
}

impl FileWatcher {
    /// Start watching `root` recursively
    ///
    /// `filter` decides which paths are interesting (typically: the
    /// registry has a serializer for them); everything else is dropped at
    /// the adapter.
    pub fn start(
        root: &Path,
        filter: impl Fn(&FileId) -> bool + Send + 'static,
        coalescer: Arc<ChangeCoalescer>,
    ) -> Result<Self> {
        let wakeup = Arc::new(Notify::new());
        let waker = wakeup.clone();

        let mut watcher = notify::recommended_watcher(move |outcome: notify::Result<Event>| {
            let event = match outcome {
                Ok(event) => event,
                Err(e) => {
                    warn!("watch error: {}", e);
                    return;
                }
            };
            let mut offered = false;
            for path in &event.paths {
                let file = FileId::from_path(path);
                if !filter(&file) {
                    continue;
                }
                let mapped = match event.kind {
                    EventKind::Create(_) => FileEvent::Added(file),
                    EventKind::Remove(_) => FileEvent::Removed(file),
                    EventKind::Modify(_) => FileEvent::Modified(file),
                    _ => continue,
                };
                trace!("offering {:?}", mapped);
                coalescer.offer(mapped);
                offered = true;
            }
            if offered {
                waker.notify_one();
            }
        })
        .map_err(|e| StoreError::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| StoreError::Watch(e.to_string()))?;

        Ok(FileWatcher { _watcher: watcher, wakeup })
    }

    /// Resolves after at least one interesting event was offered
    pub async fn changed(&self) {
        self.wakeup.notified().await;
    }
}

// ============================================================================
// Synchronization Module
// ============================================================================
//
// Keeps the live entity model synchronized with the configuration files:
//
// file events -> ChangeCoalescer -> SyncOrchestrator.reconcile()
//   -> Loader (changed files into a delta builder)
//   -> replace-by-source merge into the live cell
//   -> listeners notified with the changed sources
//
// ============================================================================

pub mod coalescer;
pub mod loader;
pub mod orchestrator;
pub mod persister;
#[cfg(feature = "watch")]
pub mod watcher;

pub use coalescer::{ChangeCoalescer, FileEvent, PendingChangeSet};
pub use loader::{ContentCache, LoadError, LoadReport, Loader, MacroMap};
pub use orchestrator::{ReconcileOutcome, SyncOrchestrator, SyncState, MAX_APPLY_ATTEMPTS};
pub use persister::{PersistReport, Persister};
#[cfg(feature = "watch")]
pub use watcher::FileWatcher;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag for the loading phase
///
/// Checked between per-file loads; the apply step never observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

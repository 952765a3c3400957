// ============================================================================
// Change Coalescer
// ============================================================================
//
// Folds raw file-system notifications into one net change-set per
// reconciliation cycle. A burst of events (e.g. a VCS branch switch
// touching thousands of files) costs exactly one pass per drain.
//
// ============================================================================

use std::collections::HashSet;
use std::sync::Mutex;

use crate::core::FileId;

/// A raw file-system notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Added(FileId),
    Removed(FileId),
    Modified(FileId),
}

impl FileEvent {
    pub fn file(&self) -> &FileId {
        match self {
            FileEvent::Added(f) | FileEvent::Removed(f) | FileEvent::Modified(f) => f,
        }
    }
}

/// Accumulated net changes since the last drain
///
/// For any file id the three sets are disjoint: folding keeps only the net
/// effect of the event run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChangeSet {
    added: HashSet<FileId>,
    removed: HashSet<FileId>,
    modified: HashSet<FileId>,
}

impl PendingChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn added(&self) -> &HashSet<FileId> {
        &self.added
    }

    pub fn removed(&self) -> &HashSet<FileId> {
        &self.removed
    }

    pub fn modified(&self) -> &HashSet<FileId> {
        &self.modified
    }

    /// Every file named by this change-set
    pub fn all_files(&self) -> impl Iterator<Item = &FileId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.modified.iter())
    }

    /// Files that currently exist and should be (re)read
    pub fn loadable_files(&self) -> impl Iterator<Item = &FileId> {
        self.added.iter().chain(self.modified.iter())
    }

    /// Fold one event into the net state for its file
    ///
    /// Added then Removed cancels out; Removed then Added nets to Modified
    /// (the identity is presumed to reappear as changed); Modified after
    /// Added stays Added.
    pub fn fold(&mut self, event: FileEvent) {
        match event {
            FileEvent::Added(file) => {
                if self.removed.remove(&file) {
                    self.modified.insert(file);
                } else if !self.modified.contains(&file) {
                    self.added.insert(file);
                }
            }
            FileEvent::Removed(file) => {
                if self.added.remove(&file) {
                    return;
                }
                self.modified.remove(&file);
                self.removed.insert(file);
            }
            FileEvent::Modified(file) => {
                if self.added.contains(&file) {
                    return;
                }
                self.removed.remove(&file);
                self.modified.insert(file);
            }
        }
    }

    /// Fold a later change-set into this one
    pub fn merge(&mut self, later: PendingChangeSet) {
        for file in later.removed {
            self.fold(FileEvent::Removed(file));
        }
        for file in later.added {
            self.fold(FileEvent::Added(file));
        }
        for file in later.modified {
            self.fold(FileEvent::Modified(file));
        }
    }
}

/// Thread-safe accumulator between the watcher and the orchestrator
///
/// `drain` is linearizable with respect to `offer`: an event offered
/// before a drain is part of that drain's result or an earlier one.
#[derive(Debug, Default)]
pub struct ChangeCoalescer {
    pending: Mutex<PendingChangeSet>,
}

impl ChangeCoalescer {
    pub fn new() -> Self {
        ChangeCoalescer { pending: Mutex::new(PendingChangeSet::default()) }
    }

    pub fn offer(&self, event: FileEvent) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.fold(event);
    }

    /// Atomically take the accumulated set; `None` when nothing is pending
    pub fn drain(&self) -> Option<PendingChangeSet> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *pending))
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Put a drained change-set back, ahead of anything offered since
    ///
    /// Used when a cycle aborts before applying: the drained changes are
    /// still unprocessed and must survive for the next cycle.
    pub fn restore(&self, mut earlier: PendingChangeSet) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let later = std::mem::take(&mut *pending);
        earlier.merge(later);
        *pending = earlier;
    }
}

// ============================================================================
// Synchronization Orchestrator
// ============================================================================
//
// Top-level coordinator between the file system and the live model:
// initial load, incremental reconciliation of coalesced file changes, and
// the optimistic-merge-then-exclusive-fallback apply protocol.
//
// Loading and parsing may suspend on I/O; the apply step is CPU-only and
// runs to completion once started. Reconciliation cycles are serialized:
// changes offered while a cycle is in flight queue in the coalescer for
// the next cycle.
//
// ============================================================================

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info};

use crate::core::{EntitySource, FileId, Result};
use crate::serial::SerializerRegistry;
use crate::storage::{EntitySnapshot, VersionedCell};
use crate::sync::coalescer::{ChangeCoalescer, PendingChangeSet};
use crate::sync::loader::{ContentCache, LoadError, Loader};
use crate::sync::CancelFlag;

/// Optimistic apply attempts before falling back to the exclusive section
pub const MAX_APPLY_ATTEMPTS: usize = 2;

/// Lifecycle of the orchestrator
///
/// ```text
/// Uninitialized ──initial_load──> Loading ──> Ready
///       Ready <──────────────── Reconciling <──reconcile── Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Loading,
    Ready,
    Reconciling,
}

/// What a load or reconcile cycle did
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Whether a new snapshot was published
    pub applied: bool,
    /// Live version after the cycle
    pub version: u64,
    /// Sources whose entities changed; empty when nothing was applied
    pub changed_sources: HashSet<EntitySource>,
    /// Recovered per-file failures
    pub errors: Vec<LoadError>,
}

type SourcesListener = Box<dyn Fn(&HashSet<EntitySource>) + Send + Sync>;

/// Coordinates loading, reconciliation and publication of the live model
pub struct SyncOrchestrator {
    cell: Arc<VersionedCell>,
    coalescer: Arc<ChangeCoalescer>,
    registry: SerializerRegistry,
    cache: tokio::sync::Mutex<ContentCache>,
    /// Serializes whole cycles; concurrent reconciliations are not permitted
    cycle_lock: tokio::sync::Mutex<()>,
    state: Mutex<SyncState>,
    listeners: RwLock<Vec<SourcesListener>>,
    cancel: CancelFlag,
}

impl SyncOrchestrator {
    pub fn new(
        cell: Arc<VersionedCell>,
        coalescer: Arc<ChangeCoalescer>,
        registry: SerializerRegistry,
        cache: ContentCache,
    ) -> Self {
        SyncOrchestrator {
            cell,
            coalescer,
            registry,
            cache: tokio::sync::Mutex::new(cache),
            cycle_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SyncState::Uninitialized),
            listeners: RwLock::new(Vec::new()),
            cancel: CancelFlag::new(),
        }
    }

    pub fn cell(&self) -> &Arc<VersionedCell> {
        &self.cell
    }

    pub fn coalescer(&self) -> &Arc<ChangeCoalescer> {
        &self.coalescer
    }

    /// Whether any registered serializer handles `file`
    pub fn has_serializer_for(&self, file: &FileId) -> bool {
        self.registry.resolve(file).is_some()
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cooperative cancellation of the parsing phase
    ///
    /// An apply that already started still runs to completion.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Register a listener invoked once per successful apply, after the
    /// live reference moved
    pub fn add_listener(&self, listener: impl Fn(&HashSet<EntitySource>) + Send + Sync + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Load the full file set and publish it as version 1
    ///
    /// No retry is needed: nothing can have observed an earlier version.
    pub async fn initial_load(&self, files: &[FileId]) -> Result<ReconcileOutcome> {
        let _cycle = self.cycle_lock.lock().await;
        self.set_state(SyncState::Loading);

        let ordered = ordered_files(files.iter().cloned());
        let report = {
            let mut cache = self.cache.lock().await;
            Loader::load_all(&ordered, &self.registry, &mut cache, &self.cancel).await
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                self.set_state(SyncState::Uninitialized);
                return Err(e);
            }
        };

        let changed_sources = report.touched_sources.clone();
        let replacement = report.builder.seal_partial();
        let outcome = self.apply(|source| source.is_file_backed(), &replacement, changed_sources);
        let outcome = match outcome {
            Ok(mut outcome) => {
                outcome.errors = report.errors;
                outcome
            }
            Err(e) => {
                self.set_state(SyncState::Uninitialized);
                return Err(e);
            }
        };

        self.set_state(SyncState::Ready);
        info!(
            "initial load published version {} ({} entities, {} errors)",
            outcome.version,
            self.cell.current().len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Run one reconciliation cycle if the coalescer has pending changes
    ///
    /// Reconciling with nothing pending is free: no version bump, no
    /// listener notification.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let _cycle = self.cycle_lock.lock().await;

        let Some(changes) = self.coalescer.drain() else {
            return Ok(ReconcileOutcome {
                applied: false,
                version: self.cell.version(),
                ..ReconcileOutcome::default()
            });
        };

        self.set_state(SyncState::Reconciling);
        let drained = changes.clone();
        let result = self.reconcile_changes(changes).await;
        if result.is_err() {
            // the cycle aborted before applying; keep the changes for the
            // next one so nothing is dropped
            self.coalescer.restore(drained);
        }
        self.set_state(SyncState::Ready);
        result
    }

    async fn reconcile_changes(&self, changes: PendingChangeSet) -> Result<ReconcileOutcome> {
        // 1. affected files: everything named by the change-set, expanded
        // through cross-file dependencies to a fixpoint
        let named: HashSet<FileId> = changes.all_files().cloned().collect();
        let affected_files = self.expand_dependents(named);

        // files that no longer exist are merged away, not read
        let removed: HashSet<&FileId> = changes.removed().iter().collect();
        let loadable = ordered_files(
            affected_files
                .iter()
                .filter(|f| !removed.contains(*f))
                .cloned(),
        );

        // 2. re-read and re-parse the affected files into a delta
        let report = {
            let mut cache = self.cache.lock().await;
            for file in changes.loadable_files() {
                cache.invalidate(file);
            }
            for file in changes.removed() {
                cache.invalidate(file);
            }
            Loader::load_all(&loadable, &self.registry, &mut cache, &self.cancel).await?
        };

        // affected sources: every source anchored at an affected file
        // (including removed ones, so their entities drop out) plus
        // whatever the delta actually touched
        let current = self.cell.current();
        let mut affected_sources = report.touched_sources.clone();
        for source in current.sources() {
            if let Some(file) = source.file_id() {
                if affected_files.contains(file) {
                    affected_sources.insert(source.clone());
                }
            }
        }
        for file in &affected_files {
            affected_sources.insert(EntitySource::file(file.clone()));
        }

        // 3. no-op cycle: nothing loaded and nothing live is affected
        let touches_live =
            current.has_source_matching(|source| affected_sources.contains(source));
        if !report.builder.has_changes() && !touches_live {
            debug!("reconcile: no effective changes, skipping apply");
            return Ok(ReconcileOutcome {
                applied: false,
                version: current.version(),
                changed_sources: HashSet::new(),
                errors: report.errors,
            });
        }
        drop(current);

        // 4-5. optimistic merge with retry, then exclusive fallback
        let replacement = report.builder.seal_partial();
        let mut outcome = self.apply(
            |source| affected_sources.contains(source),
            &replacement,
            affected_sources.clone(),
        )?;
        outcome.errors = report.errors;
        info!(
            "reconciled {} sources into version {}",
            outcome.changed_sources.len(),
            outcome.version
        );
        Ok(outcome)
    }

    /// Publish `replacement` over the sources selected by `predicate` and
    /// notify listeners exactly once
    fn apply<P>(
        &self,
        predicate: P,
        replacement: &EntitySnapshot,
        changed_sources: HashSet<EntitySource>,
    ) -> Result<ReconcileOutcome>
    where
        P: Fn(&EntitySource) -> bool,
    {
        let published = self
            .cell
            .publish_with_retry(MAX_APPLY_ATTEMPTS, |builder| {
                builder.replace_by_source(&predicate, replacement)
            })?;

        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(&changed_sources);
        }

        Ok(ReconcileOutcome {
            applied: true,
            version: published.version(),
            changed_sources,
            errors: Vec::new(),
        })
    }

    /// Expand a file set through `dependent_files` to a fixpoint
    ///
    /// Dependencies are a conservative over-approximation supplied by the
    /// serializer layer; reloading too much is safe, missing a stale
    /// reference is not.
    fn expand_dependents(&self, seed: HashSet<FileId>) -> HashSet<FileId> {
        let mut affected = seed.clone();
        let mut queue: Vec<FileId> = seed.into_iter().collect();
        while let Some(file) = queue.pop() {
            for dependent in self.registry.dependent_files(&file) {
                if affected.insert(dependent.clone()) {
                    queue.push(dependent);
                }
            }
        }
        affected
    }

    /// Persist entities of the given dirty sources back to their files
    ///
    /// Delegates to the persister under the cache lock so write-back and
    /// loading never interleave.
    pub async fn save_dirty(&self, dirty: &HashSet<EntitySource>) -> Result<crate::sync::persister::PersistReport> {
        let snapshot = self.cell.current();
        let mut cache = self.cache.lock().await;
        crate::sync::persister::Persister::save(&snapshot, dirty, &self.registry, &mut cache)
    }

    fn set_state(&self, next: SyncState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!("sync state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// Deterministic load order regardless of set iteration order
fn ordered_files(files: impl Iterator<Item = FileId>) -> Vec<FileId> {
    let ordered: BTreeSet<FileId> = files.collect();
    ordered.into_iter().collect()
}

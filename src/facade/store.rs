use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{EntitySource, FileId, Result};
use crate::serial::{EntitySerializer, SerializerRegistry};
use crate::storage::{EntitySnapshot, VersionedCell};
use crate::sync::coalescer::{ChangeCoalescer, FileEvent};
use crate::sync::loader::{ContentCache, MacroMap};
use crate::sync::orchestrator::{ReconcileOutcome, SyncOrchestrator, SyncState};
use crate::sync::persister::PersistReport;

/// Configuration for an [`EntityStore`]
///
/// # Examples
///
/// ```
/// use entstore::{EntityStore, MacroMap};
///
/// let store = EntityStore::builder()
///     .macros(MacroMap::new().with("PROJECT_DIR", "/srv/project"))
///     .cache_capacity(1024)
///     .build();
/// assert_eq!(store.version(), 0);
/// ```
pub struct EntityStoreBuilder {
    registry: SerializerRegistry,
    macros: MacroMap,
    cache_capacity: usize,
}

impl EntityStoreBuilder {
    pub fn new() -> Self {
        EntityStoreBuilder {
            registry: SerializerRegistry::new(),
            macros: MacroMap::new(),
            cache_capacity: ContentCache::DEFAULT_CAPACITY,
        }
    }

    /// Register a serializer; registration order decides match priority
    pub fn serializer(mut self, serializer: Arc<dyn EntitySerializer>) -> Self {
        self.registry.register(serializer);
        self
    }

    /// Macro substitutions applied to file content before parsing
    pub fn macros(mut self, macros: MacroMap) -> Self {
        self.macros = macros;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn build(self) -> EntityStore {
        let cell = Arc::new(VersionedCell::new(EntitySnapshot::empty()));
        let coalescer = Arc::new(ChangeCoalescer::new());
        let cache = ContentCache::new(self.cache_capacity, self.macros);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            cell,
            coalescer,
            self.registry,
            cache,
        ));
        EntityStore { orchestrator }
    }
}

impl Default for EntityStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Versioned in-memory entity store synchronized with configuration files
///
/// The recommended entry point: wires the live snapshot cell, the change
/// coalescer and the synchronization orchestrator together behind one
/// handle. Snapshots read through [`EntityStore::snapshot`] are immutable
/// and valid until a newer version replaces them as current; readers never
/// block writers.
///
/// # Examples
///
/// ```no_run
/// use entstore::{EntityStore, FileEvent, FileId};
///
/// # async fn example() -> entstore::Result<()> {
/// let store = EntityStore::builder().build();
///
/// // initial load over the project's configuration files
/// store.initial_load(&[FileId::from("conf/a.cfg")]).await?;
///
/// // a watcher (or test) reports changes; reconcile merges them in
/// store.offer(FileEvent::Modified(FileId::from("conf/a.cfg")));
/// let outcome = store.reconcile().await?;
/// assert!(outcome.applied);
/// # Ok(())
/// # }
/// ```
pub struct EntityStore {
    orchestrator: Arc<SyncOrchestrator>,
}

impl EntityStore {
    pub fn builder() -> EntityStoreBuilder {
        EntityStoreBuilder::new()
    }

    /// The current snapshot; cheap, lock-free
    pub fn snapshot(&self) -> Arc<EntitySnapshot> {
        self.orchestrator.cell().current()
    }

    /// Version of the current snapshot
    pub fn version(&self) -> u64 {
        self.orchestrator.cell().version()
    }

    pub fn state(&self) -> SyncState {
        self.orchestrator.state()
    }

    /// Feed a raw file event into the coalescer
    pub fn offer(&self, event: FileEvent) {
        self.orchestrator.coalescer().offer(event);
    }

    pub fn has_pending_changes(&self) -> bool {
        self.orchestrator.coalescer().has_pending()
    }

    /// Load the full configuration file set and publish version 1
    pub async fn initial_load(&self, files: &[FileId]) -> Result<ReconcileOutcome> {
        self.orchestrator.initial_load(files).await
    }

    /// Run one reconciliation cycle over the pending changes, if any
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        self.orchestrator.reconcile().await
    }

    /// Write entities of the given dirty sources back to their files
    pub async fn save_dirty(&self, dirty: &HashSet<EntitySource>) -> Result<PersistReport> {
        self.orchestrator.save_dirty(dirty).await
    }

    /// Register a listener invoked once per successful apply
    pub fn on_sources_changed(
        &self,
        listener: impl Fn(&HashSet<EntitySource>) + Send + Sync + 'static,
    ) {
        self.orchestrator.add_listener(listener);
    }

    /// Cancel the loading phase of an in-flight cycle
    pub fn cancel(&self) {
        self.orchestrator.cancel_flag().cancel();
    }

    /// Direct access to the live cell, for consumers staging their own
    /// edits through the optimistic protocol
    pub fn cell(&self) -> &Arc<VersionedCell> {
        self.orchestrator.cell()
    }

    /// Start a notify-backed watcher feeding this store's coalescer
    ///
    /// Only files some registered serializer matches are offered.
    #[cfg(feature = "watch")]
    pub fn watch(&self, root: &std::path::Path) -> Result<crate::sync::watcher::FileWatcher> {
        let orchestrator = self.orchestrator.clone();
        crate::sync::watcher::FileWatcher::start(
            root,
            move |file| orchestrator.has_serializer_for(file),
            self.orchestrator.coalescer().clone(),
        )
    }
}

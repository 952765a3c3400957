// ============================================================================
// entstore Library
// ============================================================================
//
// A versioned, in-memory entity store that stays synchronized with a set
// of configuration files: snapshot-isolated reads over immutable,
// structurally-shared snapshots; copy-on-write staging through builders;
// a provenance-based selective merge (replace-by-source); an optimistic
// compare-and-swap apply protocol with an exclusive fallback; and an
// event-coalescing reconciliation loop driven by file-system
// notifications.
//
// ============================================================================

pub mod core;
pub mod facade;
pub mod serial;
pub mod storage;
pub mod sync;

// Re-export main types for convenience
pub use crate::core::{
    Entity, EntityId, EntityKind, EntityRef, EntitySource, FileId, RelationKind, Result,
    StoreError,
};
pub use facade::{EntityStore, EntityStoreBuilder};
pub use serial::{EntitySerializer, SerializerRegistry};
pub use storage::{BuilderSnapshot, EntitySnapshot, StorageBuilder, VersionedCell};
pub use sync::{
    CancelFlag, ChangeCoalescer, ContentCache, FileEvent, LoadError, LoadReport, Loader,
    MacroMap, PendingChangeSet, PersistReport, Persister, ReconcileOutcome, SyncOrchestrator,
    SyncState, MAX_APPLY_ATTEMPTS,
};
#[cfg(feature = "watch")]
pub use sync::FileWatcher;

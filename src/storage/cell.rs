// ============================================================================
// Versioned Snapshot Cell
// ============================================================================
//
// The single mutable reference in the hot path: the process-wide "current"
// snapshot. Readers load it without locking; writers publish through an
// optimistic compare-and-swap, falling back to an exclusive section when
// contention persists. The apply step is CPU-only and never suspends.
//
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use arc_swap::ArcSwap;

use crate::core::{Result, StoreError};
use crate::storage::builder::StorageBuilder;
use crate::storage::snapshot::EntitySnapshot;

/// Token for a speculative update started from a known version
///
/// Remembers the base snapshot the builder was seeded from; committing
/// succeeds only if the cell still holds that exact snapshot.
pub struct BuilderSnapshot {
    base: Arc<EntitySnapshot>,
    pub builder: StorageBuilder,
}

impl BuilderSnapshot {
    /// Version this update started from
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }

    pub fn base(&self) -> &Arc<EntitySnapshot> {
        &self.base
    }
}

/// Versioned cell holding the live snapshot
///
/// Reads are lock-free (`current`). Publishing compares against the base
/// the update was derived from; the apply lock is held only around the
/// pointer swap on the optimistic path, and across the whole rebuild in
/// `commit_exclusive`, which therefore cannot lose the race.
pub struct VersionedCell {
    current: ArcSwap<EntitySnapshot>,
    apply_lock: Mutex<()>,
}

impl VersionedCell {
    pub fn new(initial: EntitySnapshot) -> Self {
        VersionedCell {
            current: ArcSwap::from_pointee(initial),
            apply_lock: Mutex::new(()),
        }
    }

    /// The current snapshot; valid until a newer version replaces it
    pub fn current(&self) -> Arc<EntitySnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Start a speculative update seeded from the current snapshot
    pub fn begin_update(&self) -> BuilderSnapshot {
        let base = self.current.load_full();
        let builder = StorageBuilder::from_snapshot(&base);
        BuilderSnapshot { base, builder }
    }

    /// Seal and publish; fails with `StaleVersion` if the cell moved on
    ///
    /// Seal-time errors (referential integrity) propagate without touching
    /// the cell.
    pub fn try_commit(&self, update: BuilderSnapshot) -> Result<Arc<EntitySnapshot>> {
        let BuilderSnapshot { base, builder } = update;
        let sealed = Arc::new(builder.seal()?);
        let _guard = self.apply_lock.lock()?;
        let previous = self.current.compare_and_swap(&base, sealed.clone());
        if Arc::ptr_eq(&previous, &base) {
            Ok(sealed)
        } else {
            Err(StoreError::StaleVersion)
        }
    }

    /// Publish under the apply lock; cannot fail by staleness
    ///
    /// `mutate` runs against the freshest snapshot while every other writer
    /// is blocked, so the swap is unconditional. `mutate` must not call
    /// back into this cell.
    pub fn commit_exclusive<F>(&self, mut mutate: F) -> Result<Arc<EntitySnapshot>>
    where
        F: FnMut(&mut StorageBuilder) -> Result<()>,
    {
        let _guard = self.apply_lock.lock()?;
        let base = self.current.load_full();
        let mut builder = StorageBuilder::from_snapshot(&base);
        mutate(&mut builder)?;
        let sealed = Arc::new(builder.seal()?);
        self.current.store(sealed.clone());
        Ok(sealed)
    }

    /// Optimistic-then-exclusive publish protocol
    ///
    /// Runs `mutate` against a fresh builder and attempts a compare-and-swap
    /// publish, retrying up to `attempts` times on staleness; after that the
    /// same mutation runs once more under the exclusive section, which
    /// always succeeds. Errors other than staleness abort immediately and
    /// leave the cell at its previous version.
    pub fn publish_with_retry<F>(&self, attempts: usize, mut mutate: F) -> Result<Arc<EntitySnapshot>>
    where
        F: FnMut(&mut StorageBuilder) -> Result<()>,
    {
        for _ in 0..attempts {
            let mut update = self.begin_update();
            mutate(&mut update.builder)?;
            match self.try_commit(update) {
                Ok(snapshot) => return Ok(snapshot),
                Err(StoreError::StaleVersion) => continue,
                Err(other) => return Err(other),
            }
        }
        self.commit_exclusive(mutate)
    }
}

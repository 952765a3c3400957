// ============================================================================
// Storage Builder
// ============================================================================
//
// A mutable overlay on top of a base EntitySnapshot. Mutations touch only
// the builder's persistent maps; the base snapshot is never modified.
// Sealing produces the next immutable snapshot, consuming the builder.
//
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{Entity, EntityId, EntitySource, Result, StoreError};
use crate::storage::snapshot::EntitySnapshot;

/// Mutable overlay used to stage changes before sealing into a snapshot
///
/// Seeding from a snapshot is O(1) (structural sharing); `seal` verifies
/// referential integrity and bumps the version. The builder is consumed by
/// `seal`, so use-after-seal is impossible by construction.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    base_version: u64,
    entities: im::HashMap<EntityId, Arc<Entity>>,
    by_source: im::HashMap<EntitySource, im::HashSet<EntityId>>,
    changed: bool,
}

impl StorageBuilder {
    /// Fresh builder over the empty snapshot
    pub fn new() -> Self {
        Self::from_snapshot(&EntitySnapshot::empty())
    }

    /// Seed a builder from `base` without copying entity data
    pub fn from_snapshot(base: &EntitySnapshot) -> Self {
        let (entities, by_source) = base.parts();
        StorageBuilder {
            base_version: base.version(),
            entities: entities.clone(),
            by_source: by_source.clone(),
            changed: false,
        }
    }

    /// Version of the snapshot this builder was seeded from
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// True iff any mutating call was made since creation
    ///
    /// This tracks calls, not net content: a replace that happens to leave
    /// every entity equal still counts.
    pub fn has_changes(&self) -> bool {
        self.changed
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    /// Add a new entity; fails if the id already exists in the effective state
    pub fn add_entity(&mut self, entity: Entity) -> Result<()> {
        if self.entities.contains_key(entity.id()) {
            return Err(StoreError::DuplicateId(entity.id().clone()));
        }
        self.changed = true;
        self.insert_arc(Arc::new(entity));
        Ok(())
    }

    /// Add a batch of entities atomically
    ///
    /// Either every entity is added or none is: ids are checked against the
    /// effective state and against each other before anything is inserted,
    /// so a duplicate cannot leave a partially-applied batch behind.
    pub fn add_entities(&mut self, entities: Vec<Entity>) -> Result<()> {
        let mut batch_ids: HashSet<&EntityId> = HashSet::with_capacity(entities.len());
        for entity in &entities {
            if self.entities.contains_key(entity.id()) || !batch_ids.insert(entity.id()) {
                return Err(StoreError::DuplicateId(entity.id().clone()));
            }
        }
        self.changed = true;
        for entity in entities {
            self.insert_arc(Arc::new(entity));
        }
        Ok(())
    }

    /// Remove an entity and everything that cannot exist without it
    ///
    /// No-op if absent. Removal cascades transitively through `Owned`
    /// references: any entity holding an `Owned` reference to a removed
    /// entity is removed as well.
    pub fn remove_entity(&mut self, id: &EntityId) {
        if !self.entities.contains_key(id) {
            return;
        }
        self.changed = true;
        let mut queue = vec![id.clone()];
        while let Some(next) = queue.pop() {
            let Some(entity) = self.entities.remove(&next) else {
                continue;
            };
            self.unindex(&entity);
            queue.extend(
                self.entities
                    .values()
                    .filter(|e| e.is_owned_by(&next))
                    .map(|e| e.id().clone()),
            );
        }
    }

    /// Replace the value of an existing entity
    ///
    /// Returns false without touching anything if the id is absent. The
    /// replacement may carry a different source; the index follows.
    pub fn replace_entity(&mut self, entity: Entity) -> bool {
        let Some(old) = self.entities.get(entity.id()).cloned() else {
            return false;
        };
        self.changed = true;
        if old.source() != entity.source() {
            self.unindex(&old);
            self.insert_arc(Arc::new(entity));
        } else {
            self.entities.insert(entity.id().clone(), Arc::new(entity));
        }
        true
    }

    /// Selective merge: entities whose source matches `predicate` become
    /// exactly `replacement`'s entities of that predicate
    ///
    /// For every current entity with a matching source: if `replacement`
    /// holds an entity with the same id and the same source, it is kept
    /// (updated in place when the value differs); otherwise it is removed,
    /// cascading through `Owned` references. Every remaining matching
    /// entity of `replacement` is then added. Entities whose source fails
    /// the predicate are untouched even if `replacement` lacks them.
    pub fn replace_by_source<P>(&mut self, predicate: P, replacement: &EntitySnapshot) -> Result<()>
    where
        P: Fn(&EntitySource) -> bool,
    {
        self.changed = true;

        let mut kept: HashSet<EntityId> = HashSet::new();
        let mut removals: Vec<EntityId> = Vec::new();
        for entity in self.entities.values() {
            if !predicate(entity.source()) {
                continue;
            }
            match replacement.get(entity.id()) {
                Some(incoming) if incoming.source() == entity.source() => {
                    kept.insert(entity.id().clone());
                }
                _ => removals.push(entity.id().clone()),
            }
        }

        for id in &removals {
            self.remove_entity(id);
        }

        // A kept entity may have been cascade-removed along with its owner;
        // in that case it stays gone rather than coming back orphaned.
        for id in &kept {
            let (Some(current), Some(incoming)) =
                (self.entities.get(id).cloned(), replacement.get(id))
            else {
                continue;
            };
            if **incoming != *current {
                self.entities.insert(id.clone(), incoming.clone());
            }
        }

        for incoming in replacement.iter() {
            if !predicate(incoming.source()) || kept.contains(incoming.id()) {
                continue;
            }
            if self.entities.contains_key(incoming.id()) {
                // id collision with a survivor from a non-matching source
                return Err(StoreError::DuplicateId(incoming.id().clone()));
            }
            self.insert_arc(incoming.clone());
        }
        Ok(())
    }

    /// Seal into the next immutable snapshot
    ///
    /// Verifies referential integrity first; on failure nothing is
    /// published and the error names the offending reference.
    pub fn seal(self) -> Result<EntitySnapshot> {
        let snapshot = self.seal_partial();
        snapshot.verify_integrity()?;
        Ok(snapshot)
    }

    /// Seal without the referential-integrity check
    ///
    /// For intermediate generations — a load delta used as a replacement
    /// argument to `replace_by_source` — whose references may resolve only
    /// against the model they are merged into. Never publish a partial
    /// snapshot as current.
    pub fn seal_partial(self) -> EntitySnapshot {
        EntitySnapshot::from_parts(self.base_version + 1, self.entities, self.by_source)
    }

    fn insert_arc(&mut self, entity: Arc<Entity>) {
        let id = entity.id().clone();
        let source = entity.source().clone();
        self.entities.insert(id.clone(), entity);
        match self.by_source.get_mut(&source) {
            Some(ids) => {
                ids.insert(id);
            }
            None => {
                self.by_source.insert(source, im::HashSet::unit(id));
            }
        }
    }

    fn unindex(&mut self, entity: &Entity) {
        let mut emptied = false;
        if let Some(ids) = self.by_source.get_mut(entity.source()) {
            ids.remove(entity.id());
            emptied = ids.is_empty();
        }
        if emptied {
            self.by_source.remove(entity.source());
        }
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Immutable Entity Snapshot
// ============================================================================
//
// A snapshot is a versioned, structurally-shared view of the whole entity
// set. Snapshots are created by sealing a StorageBuilder and never mutated;
// unmodified substructure is shared between consecutive versions through
// persistent maps.
//
// ============================================================================

use std::sync::Arc;

use crate::core::{Entity, EntityId, EntityKind, EntitySource, Result, StoreError};

type EntityMap = im::HashMap<EntityId, Arc<Entity>>;
type SourceIndex = im::HashMap<EntitySource, im::HashSet<EntityId>>;

/// Immutable, versioned view of the entire entity set at a point in time
///
/// Logically a mapping `EntityId -> Entity` plus a derived index
/// `EntitySource -> Set<EntityId>`. Cloning is O(1); two snapshots share
/// unmodified substructure.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    version: u64,
    entities: EntityMap,
    by_source: SourceIndex,
}

impl EntitySnapshot {
    /// The empty snapshot at version 0
    pub fn empty() -> Self {
        EntitySnapshot {
            version: 0,
            entities: EntityMap::new(),
            by_source: SourceIndex::new(),
        }
    }

    pub(crate) fn from_parts(version: u64, entities: EntityMap, by_source: SourceIndex) -> Self {
        EntitySnapshot { version, entities, by_source }
    }

    pub(crate) fn parts(&self) -> (&EntityMap, &SourceIndex) {
        (&self.entities, &self.by_source)
    }

    /// Monotonically increasing version counter
    pub fn version(&self) -> u64 {
        self.version
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

    /// Ids of all entities produced by `source`
    pub fn ids_of_source(&self, source: &EntitySource) -> impl Iterator<Item = &EntityId> {
        self.by_source.get(source).into_iter().flat_map(|ids| ids.iter())
    }

    /// Entities produced by `source`
    pub fn entities_of_source<'a>(
        &'a self,
        source: &EntitySource,
    ) -> impl Iterator<Item = &'a Arc<Entity>> {
        self.ids_of_source(source).filter_map(|id| self.entities.get(id))
    }

    pub fn entities_of_kind<'a>(
        &'a self,
        kind: &'a EntityKind,
    ) -> impl Iterator<Item = &'a Arc<Entity>> {
        self.entities.values().filter(move |e| e.kind() == kind)
    }

    /// All sources that produced at least one entity
    pub fn sources(&self) -> impl Iterator<Item = &EntitySource> {
        self.by_source.keys()
    }

    /// True if any entity belongs to a source accepted by `predicate`
    pub fn has_source_matching(&self, predicate: impl Fn(&EntitySource) -> bool) -> bool {
        self.by_source
            .iter()
            .any(|(source, ids)| !ids.is_empty() && predicate(source))
    }

    /// Check that every reference resolves within this snapshot
    ///
    /// Returns the first violation found. A snapshot published as "current"
    /// always satisfies this; the check runs at seal time.
    pub fn verify_integrity(&self) -> Result<()> {
        for entity in self.entities.values() {
            for reference in entity.refs() {
                if !self.entities.contains_key(&reference.target) {
                    return Err(StoreError::ReferentialIntegrity {
                        entity: entity.id().clone(),
                        missing: reference.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Entity Model
// ============================================================================
//
// Entities are immutable typed records with a stable identity and exactly
// one provenance source. References between entities carry an explicit
// relation kind so that cascade-on-remove is a function of the relation,
// not of entity types.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::source::EntitySource;

/// Stable identifier of an entity, unique within a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// Kind of an entity (e.g. "module", "library", "content-root")
///
/// Kinds are conventions between serializers and consumers, not a closed
/// enum; new serializers introduce new kinds without touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKind(String);

impl EntityKind {
    pub fn new(kind: impl Into<String>) -> Self {
        EntityKind(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        EntityKind(s.to_string())
    }
}

/// Normalized identifier of a configuration file
///
/// Stored as a forward-slash path string so the same file compares equal
/// regardless of how the platform spelled it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        FileId(id.into().replace('\\', "/"))
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Final path segment, e.g. `a.cfg` for `conf/a.cfg`
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// File extension without the dot, if any
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        FileId::new(s)
    }
}

/// How a reference binds the holder to its target
///
/// `Owned` means the holder cannot exist without the target: removing the
/// target removes the holder transitively. `Referencing` is a plain link
/// with no lifecycle coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Owned,
    Referencing,
}

/// A typed reference from one entity to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub target: EntityId,
    pub relation: RelationKind,
}

impl EntityRef {
    pub fn owned(target: impl Into<EntityId>) -> Self {
        EntityRef { target: target.into(), relation: RelationKind::Owned }
    }

    pub fn referencing(target: impl Into<EntityId>) -> Self {
        EntityRef { target: target.into(), relation: RelationKind::Referencing }
    }
}

/// An immutable typed record with a stable id and exactly one source
///
/// Payload fields are an open JSON map; typed accessors are the
/// serializers' business. Entities are shared as `Arc<Entity>` inside
/// snapshots and must never be mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    source: EntitySource,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    refs: Vec<EntityRef>,
}

impl Entity {
    pub fn new(
        id: impl Into<EntityId>,
        kind: impl Into<EntityKind>,
        source: EntitySource,
    ) -> Self {
        Entity {
            id: id.into(),
            kind: kind.into(),
            source,
            fields: serde_json::Map::new(),
            refs: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_ref(mut self, reference: EntityRef) -> Self {
        self.refs.push(reference);
        self
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn source(&self) -> &EntitySource {
        &self.source
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.fields
    }

    pub fn refs(&self) -> &[EntityRef] {
        &self.refs
    }

    /// True if this entity holds an `Owned` reference to `target`
    pub fn is_owned_by(&self, target: &EntityId) -> bool {
        self.refs
            .iter()
            .any(|r| r.relation == RelationKind::Owned && &r.target == target)
    }
}

use serde::{Deserialize, Serialize};

use crate::core::entity::FileId;

/// Provenance tag identifying which input produced an entity
///
/// Two entities belong to the same origin iff their sources are equal.
/// Sources fall into disjoint classes selectable by predicate; the
/// selective merge (`StorageBuilder::replace_by_source`) operates on
/// those classes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitySource {
    /// Parsed out of a configuration file
    File { file: FileId },

    /// Synthetic parent keeping otherwise-orphaned entities attached to
    /// the file they came from
    DummyParent { file: FileId },

    /// Produced by in-process code, not backed by any file
    Synthetic { tag: String },

    /// Provided by a plugin or other external contributor
    Custom { tag: String },
}

impl EntitySource {
    pub fn file(file: impl Into<FileId>) -> Self {
        EntitySource::File { file: file.into() }
    }

    pub fn dummy_parent(file: impl Into<FileId>) -> Self {
        EntitySource::DummyParent { file: file.into() }
    }

    pub fn synthetic(tag: impl Into<String>) -> Self {
        EntitySource::Synthetic { tag: tag.into() }
    }

    pub fn custom(tag: impl Into<String>) -> Self {
        EntitySource::Custom { tag: tag.into() }
    }

    /// File-backed sources participate in load/persist cycles
    pub fn is_file_backed(&self) -> bool {
        matches!(self, EntitySource::File { .. })
    }

    pub fn is_dummy_parent(&self) -> bool {
        matches!(self, EntitySource::DummyParent { .. })
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EntitySource::Custom { .. })
    }

    /// The file this source is anchored at, if any
    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            EntitySource::File { file } | EntitySource::DummyParent { file } => Some(file),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitySource::File { file } => write!(f, "file:{}", file),
            EntitySource::DummyParent { file } => write!(f, "dummy:{}", file),
            EntitySource::Synthetic { tag } => write!(f, "synthetic:{}", tag),
            EntitySource::Custom { tag } => write!(f, "custom:{}", tag),
        }
    }
}

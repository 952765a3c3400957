// ============================================================================
// Entity Serializers
// ============================================================================
//
// Serializers translate between a configuration file's text and typed
// entities. The store treats them as a pluggable capability: an ordered
// registry is consulted per file, first match wins, unmatched files are
// ignored.
//
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Entity, FileId, Result};

/// Pluggable translator between file content and entities
///
/// `parse` must be deterministic relative to its input: retries of the
/// optimistic apply protocol rely on reproducing the same delta from the
/// same content. Entities produced for a file must be tagged with a source
/// derived from that file's identity.
#[async_trait]
pub trait EntitySerializer: Send + Sync {
    /// Whether this serializer handles the given file
    fn matches(&self, file: &FileId) -> bool;

    /// Parse file content into entities
    ///
    /// Async because a serializer may consult auxiliary inputs; parsing
    /// runs in the loading phase, which is allowed to suspend.
    async fn parse(&self, file: &FileId, content: &str) -> Result<Vec<Entity>>;

    /// Render entities back into file content
    ///
    /// Round trip: re-parsing the rendered output must yield the same
    /// entities, though the text need not be byte-identical to the input.
    fn render(&self, file: &FileId, entities: &[Arc<Entity>]) -> Result<String>;

    /// Files whose entities may reference entities from `file`
    ///
    /// Used to expand the affected-file set during reconciliation; a
    /// conservative over-approximation is acceptable, a miss is not.
    fn dependent_files(&self, _file: &FileId) -> HashSet<FileId> {
        HashSet::new()
    }
}

/// Ordered collection of serializers, resolved first-match-wins
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    serializers: Vec<Arc<dyn EntitySerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        SerializerRegistry { serializers: Vec::new() }
    }

    /// Register a serializer; registration order decides match priority
    pub fn register(&mut self, serializer: Arc<dyn EntitySerializer>) {
        self.serializers.push(serializer);
    }

    /// First registered serializer that matches `file`, if any
    pub fn resolve(&self, file: &FileId) -> Option<&Arc<dyn EntitySerializer>> {
        self.serializers.iter().find(|s| s.matches(file))
    }

    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    /// Union of `dependent_files` over all serializers matching `file`
    pub fn dependent_files(&self, file: &FileId) -> HashSet<FileId> {
        match self.resolve(file) {
            Some(serializer) => serializer.dependent_files(file),
            None => HashSet::new(),
        }
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("len", &self.serializers.len())
            .finish()
    }
}

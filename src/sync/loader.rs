// ============================================================================
// Loader and Content Cache
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use lru::LruCache;
use regex::Regex;

use crate::core::{EntitySource, FileId, Result, StoreError};
use crate::serial::SerializerRegistry;
use crate::storage::StorageBuilder;
use crate::sync::CancelFlag;

/// Named `$MACRO$` substitutions applied to file content before parsing
///
/// Unknown macros are left in place so a serializer can report them in
/// context.
#[derive(Debug, Clone)]
pub struct MacroMap {
    values: HashMap<String, String>,
    pattern: Regex,
}

impl MacroMap {
    pub fn new() -> Self {
        MacroMap {
            values: HashMap::new(),
            pattern: Regex::new(r"\$([A-Za-z0-9_]+)\$").expect("static pattern"),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn expand(&self, text: &str) -> String {
        if self.values.is_empty() {
            return text.to_string();
        }
        self.pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                match self.values.get(&caps[1]) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl Default for MacroMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache of macro-expanded configuration file content
///
/// Keyed by file identity, filled lazily, invalidated explicitly. Owned by
/// the orchestrator; callers serialize access (the load and persist paths
/// never run concurrently).
pub struct ContentCache {
    entries: LruCache<FileId, Arc<str>>,
    macros: MacroMap,
}

impl ContentCache {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize, macros: MacroMap) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(Self::DEFAULT_CAPACITY).expect("nonzero"));
        ContentCache { entries: LruCache::new(capacity), macros }
    }

    /// Read any uncached files concurrently, expand macros, memoize
    ///
    /// Unreadable files are reported as `LoadError`s and simply stay
    /// uncached.
    pub async fn prime(&mut self, files: &[FileId]) -> Vec<LoadError> {
        let missing: Vec<FileId> = files
            .iter()
            .filter(|f| !self.entries.contains(*f))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Vec::new();
        }

        let reads = join_all(missing.into_iter().map(|file| async move {
            let outcome = tokio::fs::read_to_string(file.as_path()).await;
            (file, outcome)
        }))
        .await;

        let mut errors = Vec::new();
        for (file, outcome) in reads {
            match outcome {
                Ok(text) => {
                    let expanded: Arc<str> = Arc::from(self.macros.expand(&text));
                    self.entries.put(file, expanded);
                }
                Err(e) => {
                    warn!("failed to read '{}': {}", file, e);
                    errors.push(LoadError { file, message: e.to_string() });
                }
            }
        }
        errors
    }

    pub fn get(&mut self, file: &FileId) -> Option<Arc<str>> {
        self.entries.get(file).cloned()
    }

    /// Look without refreshing recency
    pub fn peek(&self, file: &FileId) -> Option<&Arc<str>> {
        self.entries.peek(file)
    }

    /// Record content without touching the file system
    ///
    /// The persister calls this with what it just wrote so the echoed
    /// change notification reloads nothing.
    pub fn insert(&mut self, file: FileId, content: impl Into<Arc<str>>) {
        self.entries.put(file, content.into());
    }

    pub fn invalidate(&mut self, file: &FileId) {
        self.entries.pop(file);
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// A recovered per-file failure; never aborts the batch
#[derive(Debug, Clone)]
pub struct LoadError {
    pub file: FileId,
    pub message: String,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

/// Result of loading a file set
pub struct LoadReport {
    /// Entities from every successfully parsed file
    pub builder: StorageBuilder,
    /// Every source that produced an entity during this load
    pub touched_sources: HashSet<EntitySource>,
    /// Per-file failures, in file order
    pub errors: Vec<LoadError>,
}

/// Reads configuration files through the registry into a fresh builder
pub struct Loader;

impl Loader {
    /// Load `files` into a fresh builder
    ///
    /// Files without a matching serializer are skipped. Malformed files
    /// and duplicate-id batches are collected as `LoadError`s; the
    /// offending file's entities are dropped while every other file
    /// loads normally. Given the same file contents and cache state the
    /// resulting entity set is identical, which the retry protocol relies
    /// on. The cancellation flag is checked between files.
    pub async fn load_all(
        files: &[FileId],
        registry: &SerializerRegistry,
        cache: &mut ContentCache,
        cancel: &CancelFlag,
    ) -> Result<LoadReport> {
        let matched: Vec<_> = files
            .iter()
            .filter_map(|f| registry.resolve(f).map(|s| (f.clone(), s.clone())))
            .collect();
        let paths: Vec<FileId> = matched.iter().map(|(f, _)| f.clone()).collect();

        let mut errors = cache.prime(&paths).await;
        let mut builder = StorageBuilder::new();
        let mut touched_sources = HashSet::new();

        for (file, serializer) in &matched {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let Some(content) = cache.get(file) else {
                // read failure already reported by prime
                continue;
            };
            let entities = match serializer.parse(file, &content).await {
                Ok(entities) => entities,
                Err(e) => {
                    warn!("failed to parse '{}': {}", file, e);
                    errors.push(LoadError { file: file.clone(), message: e.to_string() });
                    continue;
                }
            };
            let sources: HashSet<EntitySource> =
                entities.iter().map(|e| e.source().clone()).collect();
            match builder.add_entities(entities) {
                Ok(()) => {
                    touched_sources.extend(sources);
                }
                Err(e) => {
                    // a duplicate id drops this file's entities entirely
                    warn!("dropping entities of '{}': {}", file, e);
                    errors.push(LoadError { file: file.clone(), message: e.to_string() });
                }
            }
        }

        debug!(
            "loaded {} entities from {} files ({} errors)",
            builder.len(),
            matched.len(),
            errors.len()
        );
        Ok(LoadReport { builder, touched_sources, errors })
    }
}

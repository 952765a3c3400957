// ============================================================================
// Persister
// ============================================================================
//
// The write-back counterpart of the loader: renders entities of dirty
// file-backed sources through their serializers and writes only files
// whose content actually differs from what is cached, so a save does not
// ripple back through the watcher as a fresh reconciliation.
//
// ============================================================================

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use log::{debug, warn};

use crate::core::{Entity, EntitySource, FileId, Result};
use crate::serial::SerializerRegistry;
use crate::storage::EntitySnapshot;
use crate::sync::loader::{ContentCache, LoadError};

/// What a save pass did
#[derive(Debug, Default)]
pub struct PersistReport {
    pub written: Vec<FileId>,
    pub deleted: Vec<FileId>,
    pub skipped: Vec<FileId>,
    pub errors: Vec<LoadError>,
}

/// Writes dirty entities back to their configuration files
pub struct Persister;

impl Persister {
    /// Persist entities of `dirty` sources from `snapshot`
    ///
    /// Non-file-backed sources are ignored. A file whose sources no longer
    /// have entities is deleted rather than written empty. Writes are
    /// atomic (temp file + rename) and the cache is refreshed with the
    /// written content.
    pub fn save(
        snapshot: &EntitySnapshot,
        dirty: &HashSet<EntitySource>,
        registry: &SerializerRegistry,
        cache: &mut ContentCache,
    ) -> Result<PersistReport> {
        // group dirty sources by the file they are anchored at; BTreeMap
        // keeps the write order stable
        let mut by_file: BTreeMap<FileId, Vec<&EntitySource>> = BTreeMap::new();
        for source in dirty {
            if let Some(file) = source.file_id() {
                by_file.entry(file.clone()).or_default().push(source);
            }
        }

        let mut report = PersistReport::default();
        for (file, sources) in by_file {
            let mut entities: Vec<Arc<Entity>> = sources
                .iter()
                .copied()
                .flat_map(|source| snapshot.entities_of_source(source).cloned())
                .collect();
            entities.sort_by(|a, b| a.id().cmp(b.id()));

            if entities.is_empty() {
                match std::fs::remove_file(file.as_path()) {
                    Ok(()) => {
                        debug!("deleted '{}' (no entities left)", file);
                        cache.invalidate(&file);
                        report.deleted.push(file);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        cache.invalidate(&file);
                    }
                    Err(e) => {
                        warn!("failed to delete '{}': {}", file, e);
                        report
                            .errors
                            .push(LoadError { file, message: e.to_string() });
                    }
                }
                continue;
            }

            let Some(serializer) = registry.resolve(&file) else {
                report.errors.push(LoadError {
                    file,
                    message: "no serializer matches".to_string(),
                });
                continue;
            };
            let rendered = serializer.render(&file, &entities)?;

            if cache.peek(&file).map(|c| c.as_ref()) == Some(rendered.as_str()) {
                report.skipped.push(file);
                continue;
            }

            if let Err(e) = write_atomic(&file, &rendered) {
                warn!("failed to write '{}': {}", file, e);
                report
                    .errors
                    .push(LoadError { file, message: e.to_string() });
                continue;
            }
            cache.insert(file.clone(), rendered);
            report.written.push(file);
        }

        debug!(
            "persisted: {} written, {} skipped, {} deleted, {} errors",
            report.written.len(),
            report.skipped.len(),
            report.deleted.len(),
            report.errors.len()
        );
        Ok(report)
    }
}

/// Write via a temp file in the same directory, then rename into place
fn write_atomic(file: &FileId, content: &str) -> std::io::Result<()> {
    let path = file.as_path();
    let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| ".".into());
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

//! Shared test fixtures
//!
//! `CfgSerializer` speaks a small JSON dialect: a `.cfg` file holds an
//! array of entity specs. Rendering is deterministic (sorted by id), so
//! render-then-parse is a faithful round trip.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use entstore::{
    Entity, EntityRef, EntitySerializer, EntitySource, FileId, Result, StoreError,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct EntitySpec {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<String>,
}

fn default_kind() -> String {
    "module".to_string()
}

impl EntitySpec {
    pub fn into_entity(self, file: &FileId) -> Entity {
        let mut entity = Entity::new(self.id.as_str(), self.kind.as_str(), EntitySource::file(file.clone()));
        for (name, value) in self.fields {
            entity = entity.with_field(name, value);
        }
        for target in self.owns {
            entity = entity.with_ref(EntityRef::owned(target.as_str()));
        }
        for target in self.uses {
            entity = entity.with_ref(EntityRef::referencing(target.as_str()));
        }
        entity
    }

    pub fn from_entity(entity: &Entity) -> Self {
        let mut owns = Vec::new();
        let mut uses = Vec::new();
        for reference in entity.refs() {
            match reference.relation {
                entstore::RelationKind::Owned => owns.push(reference.target.as_str().to_string()),
                entstore::RelationKind::Referencing => {
                    uses.push(reference.target.as_str().to_string())
                }
            }
        }
        EntitySpec {
            id: entity.id().as_str().to_string(),
            kind: entity.kind().as_str().to_string(),
            fields: entity.fields().clone(),
            owns,
            uses,
        }
    }
}

/// Serializer for `.cfg` files holding a JSON array of entity specs
pub struct CfgSerializer;

#[async_trait]
impl EntitySerializer for CfgSerializer {
    fn matches(&self, file: &FileId) -> bool {
        file.extension() == Some("cfg")
    }

    async fn parse(&self, file: &FileId, content: &str) -> Result<Vec<Entity>> {
        let specs: Vec<EntitySpec> = serde_json::from_str(content).map_err(|e| {
            StoreError::Parse { file: file.clone(), message: e.to_string() }
        })?;
        Ok(specs.into_iter().map(|spec| spec.into_entity(file)).collect())
    }

    fn render(&self, file: &FileId, entities: &[Arc<Entity>]) -> Result<String> {
        let mut specs: Vec<EntitySpec> = entities.iter().map(|e| EntitySpec::from_entity(e)).collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string_pretty(&specs).map_err(|e| StoreError::Render {
            file: file.clone(),
            message: e.to_string(),
        })
    }
}

/// Like `CfgSerializer`, with a static dependency map for expansion tests
pub struct DependentCfgSerializer {
    pub dependents: HashMap<FileId, HashSet<FileId>>,
}

#[async_trait]
impl EntitySerializer for DependentCfgSerializer {
    fn matches(&self, file: &FileId) -> bool {
        CfgSerializer.matches(file)
    }

    async fn parse(&self, file: &FileId, content: &str) -> Result<Vec<Entity>> {
        CfgSerializer.parse(file, content).await
    }

    fn render(&self, file: &FileId, entities: &[Arc<Entity>]) -> Result<String> {
        CfgSerializer.render(file, entities)
    }

    fn dependent_files(&self, file: &FileId) -> HashSet<FileId> {
        self.dependents.get(file).cloned().unwrap_or_default()
    }
}

/// Write a cfg file with simple id-only modules
pub fn write_modules(dir: &Path, name: &str, ids: &[&str]) -> FileId {
    let specs: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::json!({ "id": id, "kind": "module" }))
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&specs).unwrap()).unwrap();
    FileId::from_path(&path)
}

/// Write a cfg file from raw entity specs
pub fn write_specs(dir: &Path, name: &str, specs: serde_json::Value) -> FileId {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&specs).unwrap()).unwrap();
    FileId::from_path(&path)
}

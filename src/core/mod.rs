pub mod entity;
pub mod error;
pub mod source;

pub use entity::{Entity, EntityId, EntityKind, EntityRef, FileId, RelationKind};
pub use error::{Result, StoreError};
pub use source::EntitySource;

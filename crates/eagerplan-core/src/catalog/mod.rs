//! Schema registry: entities, relations and selectable types.

mod entity;
mod registry;
mod relation;
mod schema;

pub use entity::EntityDef;
pub use registry::{Registry, RegistryBuilder};
pub use relation::{Cardinality, RelationDef};
pub use schema::{FieldKind, ObjectField, RootField, TypeDef, TypeKind};

//! The schema registry.
//!
//! A [`Registry`] is populated once through [`RegistryBuilder`], validated,
//! and then shared read-only by every request. Nothing in the walker,
//! compiler or executor mutates it.

use std::collections::BTreeMap;

use super::entity::EntityDef;
use super::relation::RelationDef;
use super::schema::{FieldKind, RootField, TypeDef};
use crate::error::{Error, Result};
use eagerplan_proto::Row;

/// Immutable schema metadata for one schema instance.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: BTreeMap<String, EntityDef>,
    relations: BTreeMap<(String, String), RelationDef>,
    types: BTreeMap<String, TypeDef>,
    roots: BTreeMap<String, RootField>,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Get an entity definition.
    pub fn entity(&self, name: &str) -> Result<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::InvalidSchema(format!("unknown entity '{name}'")))
    }

    /// All entity definitions.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    /// All relation definitions.
    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.values()
    }

    /// The entity followed by its ancestors.
    pub fn entity_chain(&self, name: &str) -> Vec<&EntityDef> {
        let mut chain = Vec::new();
        let mut current = self.entities.get(name);
        while let Some(entity) = current {
            // Guard against parent cycles left by an unvalidated registry.
            if chain.iter().any(|e: &&EntityDef| e.name == entity.name) {
                break;
            }
            chain.push(entity);
            current = entity.parent.as_deref().and_then(|p| self.entities.get(p));
        }
        chain
    }

    /// Whether the entity or one of its ancestors stores `column`.
    pub fn has_column(&self, entity: &str, column: &str) -> bool {
        self.entity_chain(entity).iter().any(|e| e.has_field(column))
    }

    /// The discriminator column of an entity or its nearest ancestor.
    pub fn discriminator(&self, entity: &str) -> Option<&str> {
        self.entity_chain(entity)
            .into_iter()
            .find_map(|e| e.discriminator.as_deref())
    }

    /// Find a relation declared on the entity or one of its ancestors.
    pub fn relation(&self, entity: &str, name: &str) -> Result<&RelationDef> {
        self.entity_chain(entity)
            .iter()
            .find_map(|e| self.relations.get(&(e.name.clone(), name.to_string())))
            .ok_or_else(|| Error::UnknownRelation {
                entity: entity.to_string(),
                relation: name.to_string(),
            })
    }

    /// Get a type definition.
    pub fn type_def(&self, name: &str) -> Result<&TypeDef> {
        self.types
            .get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Whether a type name is registered.
    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Get a top-level listing.
    pub fn root_field(&self, name: &str) -> Result<&RootField> {
        self.roots.get(name).ok_or_else(|| Error::UnknownField {
            type_name: "Query".to_string(),
            field: name.to_string(),
        })
    }

    /// Whether `type_name` declares `interface`.
    pub fn implements(&self, type_name: &str, interface: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|t| t.interfaces.iter().any(|i| i == interface))
    }

    /// Whether a value of `concrete` can appear where `abstract_type` is
    /// expected.
    pub fn is_possible_type(&self, abstract_type: &str, concrete: &str) -> bool {
        if abstract_type == concrete {
            return true;
        }
        self.types
            .get(abstract_type)
            .is_some_and(|t| t.possible_types().iter().any(|p| p == concrete))
    }

    /// Resolve the concrete type of a row selected as `type_name`.
    ///
    /// Object types resolve to themselves. For interfaces the row's
    /// discriminator value selects the possible type whose entity carries
    /// the same discriminator value. Rows without a matching subtype
    /// resolve to `None`.
    pub fn concrete_type_for(&self, type_name: &str, row: &Row) -> Option<&TypeDef> {
        let type_def = self.types.get(type_name)?;
        if !type_def.is_interface() {
            return Some(type_def);
        }

        let column = self.discriminator(&type_def.entity)?;
        let value = row.get(column)?;

        type_def
            .possible_types()
            .iter()
            .filter_map(|p| self.types.get(p))
            .find(|candidate| {
                self.entities
                    .get(&candidate.entity)
                    .and_then(|e| e.discriminator_value.as_ref())
                    == Some(value)
            })
    }
}

/// Collects definitions and validates them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDef>,
    relations: Vec<RelationDef>,
    types: Vec<TypeDef>,
    roots: Vec<RootField>,
}

impl RegistryBuilder {
    /// Add an entity.
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a relation.
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Add a relation together with its named inverse.
    pub fn relation_pair(self, relation: RelationDef, inverse_name: &str) -> Self {
        let inverse = relation.inverse(inverse_name);
        self.relation(relation).relation(inverse)
    }

    /// Add a type.
    pub fn type_def(mut self, type_def: TypeDef) -> Self {
        self.types.push(type_def);
        self
    }

    /// Add a top-level listing.
    pub fn root(mut self, root: RootField) -> Self {
        self.roots.push(root);
        self
    }

    /// Validate every cross-reference and freeze the registry.
    pub fn build(self) -> Result<Registry> {
        let mut registry = Registry::default();

        for entity in self.entities {
            if registry.entities.contains_key(&entity.name) {
                return Err(schema_error(format!("duplicate entity '{}'", entity.name)));
            }
            registry.entities.insert(entity.name.clone(), entity);
        }
        for relation in self.relations {
            let key = (relation.from_entity.clone(), relation.name.clone());
            if registry.relations.contains_key(&key) {
                return Err(schema_error(format!(
                    "duplicate relation '{}' on entity '{}'",
                    relation.name, relation.from_entity
                )));
            }
            registry.relations.insert(key, relation);
        }
        for type_def in self.types {
            if registry.types.contains_key(&type_def.name) {
                return Err(schema_error(format!("duplicate type '{}'", type_def.name)));
            }
            registry.types.insert(type_def.name.clone(), type_def);
        }
        for root in self.roots {
            registry.roots.insert(root.name.clone(), root);
        }

        validate_entities(&registry)?;
        validate_relations(&registry)?;
        validate_types(&registry)?;

        for root in registry.roots.values() {
            registry.type_def(&root.target_type)?;
        }

        Ok(registry)
    }
}

fn schema_error(message: String) -> Error {
    Error::InvalidSchema(message)
}

fn validate_entities(registry: &Registry) -> Result<()> {
    for entity in registry.entities.values() {
        let Some(parent) = &entity.parent else {
            continue;
        };
        if !registry.entities.contains_key(parent) {
            return Err(schema_error(format!(
                "entity '{}' extends unknown entity '{parent}'",
                entity.name
            )));
        }
        let chain = registry.entity_chain(&entity.name);
        if chain.last().is_some_and(|e| e.parent.is_some()) {
            return Err(schema_error(format!(
                "entity '{}' has a cyclic parent chain",
                entity.name
            )));
        }
        if registry.discriminator(parent).is_none() {
            return Err(schema_error(format!(
                "entity '{}' extends '{parent}' which has no discriminator",
                entity.name
            )));
        }
        if entity.discriminator_value.is_none() {
            return Err(schema_error(format!(
                "subtype entity '{}' has no discriminator value",
                entity.name
            )));
        }
        let parent_identity = &registry.entity(parent)?.identity_field;
        if parent_identity != &entity.identity_field {
            return Err(schema_error(format!(
                "subtype entity '{}' must share identity field '{parent_identity}'",
                entity.name
            )));
        }
    }
    Ok(())
}

fn validate_relations(registry: &Registry) -> Result<()> {
    for relation in registry.relations.values() {
        for (entity, field) in [
            (&relation.from_entity, &relation.from_field),
            (&relation.to_entity, &relation.to_field),
        ] {
            registry.entity(entity).map_err(|_| {
                schema_error(format!(
                    "relation '{}' references unknown entity '{entity}'",
                    relation.name
                ))
            })?;
            if !registry.has_column(entity, field) {
                return Err(schema_error(format!(
                    "relation '{}' references unknown field '{entity}.{field}'",
                    relation.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_types(registry: &Registry) -> Result<()> {
    for type_def in registry.types.values() {
        registry.entity(&type_def.entity).map_err(|_| {
            schema_error(format!(
                "type '{}' is backed by unknown entity '{}'",
                type_def.name, type_def.entity
            ))
        })?;

        for interface in &type_def.interfaces {
            let iface = registry.type_def(interface)?;
            if !iface.is_interface() {
                return Err(schema_error(format!(
                    "type '{}' implements '{interface}' which is not an interface",
                    type_def.name
                )));
            }
        }

        for possible in type_def.possible_types() {
            let concrete = registry.type_def(possible)?;
            if concrete.is_interface() || !registry.implements(possible, &type_def.name) {
                return Err(schema_error(format!(
                    "possible type '{possible}' of '{}' must be an object type implementing it",
                    type_def.name
                )));
            }
            let entity = registry.entity(&concrete.entity)?;
            if concrete.entity != type_def.entity && entity.discriminator_value.is_none() {
                return Err(schema_error(format!(
                    "possible type '{possible}' of '{}' is backed by an entity without a discriminator value",
                    type_def.name
                )));
            }
        }

        for field in &type_def.fields {
            match &field.kind {
                FieldKind::Scalar { column } => {
                    if !registry.has_column(&type_def.entity, column) {
                        return Err(schema_error(format!(
                            "field '{}.{}' maps to unknown column '{column}'",
                            type_def.name, field.name
                        )));
                    }
                }
                FieldKind::Relation {
                    relation,
                    target_type,
                }
                | FieldKind::Connection {
                    relation,
                    target_type,
                } => {
                    let rel = registry.relation(&type_def.entity, relation)?;
                    let target = registry.type_def(target_type)?;
                    let target_entities: Vec<&str> = registry
                        .entity_chain(&target.entity)
                        .iter()
                        .map(|e| e.name.as_str())
                        .collect();
                    if !target_entities.contains(&rel.to_entity.as_str()) {
                        return Err(schema_error(format!(
                            "field '{}.{}' targets '{target_type}' but relation '{relation}' leads to '{}'",
                            type_def.name, field.name, rel.to_entity
                        )));
                    }
                    if field.is_connection() && !rel.is_to_many() {
                        return Err(schema_error(format!(
                            "connection field '{}.{}' needs a to-many relation",
                            type_def.name, field.name
                        )));
                    }
                }
                FieldKind::Computed => {}
            }
        }
    }
    Ok(())
}

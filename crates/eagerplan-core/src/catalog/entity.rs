//! Entity definitions.

use eagerplan_proto::Value;

/// An entity definition (table schema).
///
/// A subtype entity lives in its own table keyed by the same identity as
/// its parent; reading a subtype row also yields the parent's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    /// Entity name (unique within the registry).
    pub name: String,
    /// Name of the primary identity field.
    pub identity_field: String,
    /// Column names stored in this entity's own table.
    pub fields: Vec<String>,
    /// Parent entity for subtype tables.
    pub parent: Option<String>,
    /// Column holding the concrete subtype on a polymorphic base entity.
    pub discriminator: Option<String>,
    /// Discriminator value identifying this subtype.
    pub discriminator_value: Option<Value>,
}

impl EntityDef {
    /// Create a new entity definition. The identity field is added as the
    /// first column.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        let identity_field = identity_field.into();
        Self {
            name: name.into(),
            fields: vec![identity_field.clone()],
            identity_field,
            parent: None,
            discriminator: None,
            discriminator_value: None,
        }
    }

    /// Add a column.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        self
    }

    /// Add several columns.
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        for field in fields {
            self = self.with_field(*field);
        }
        self
    }

    /// Mark this entity as polymorphic with the given discriminator column.
    pub fn with_discriminator(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self = self.with_field(field.clone());
        self.discriminator = Some(field);
        self
    }

    /// Declare this entity as a subtype of `parent` identified by `value`.
    pub fn subtype_of(mut self, parent: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parent = Some(parent.into());
        self.discriminator_value = Some(value.into());
        self
    }

    /// Check whether the entity's own table has a column.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("User", "id")
            .with_fields(&["name", "email", "name"])
            .with_field("age");

        assert_eq!(entity.fields, vec!["id", "name", "email", "age"]);
        assert!(entity.has_field("email"));
        assert!(!entity.has_field("missing"));
    }

    #[test]
    fn test_subtype_builder() {
        let base = EntityDef::new("Media", "id").with_discriminator("kind");
        let book = EntityDef::new("Book", "id")
            .with_field("isbn")
            .subtype_of("Media", "book");

        assert_eq!(base.discriminator.as_deref(), Some("kind"));
        assert!(base.has_field("kind"));
        assert_eq!(book.parent.as_deref(), Some("Media"));
        assert_eq!(book.discriminator_value, Some(Value::from("book")));
    }
}
